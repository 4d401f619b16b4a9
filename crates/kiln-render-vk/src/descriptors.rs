// SPDX-License-Identifier: CEPL-1.0
//! Descriptor plumbing and the per-object transform strategy.
//!
//! Set 0 of the geometry pipeline is per swapchain image: binding 0 holds the
//! camera block, binding 1 (dynamic-uniform mode only) holds one model matrix
//! per mesh at an aligned stride.

use crate::context::Device;
use crate::handle::Owned;
use crate::memory::{BufferHandle, GpuBuffer};
use crate::scene::DrawItem;
use crate::VkError;
use anyhow::{Context, Result};
use ash::vk;
use kiln_math::{align_up, Mat4, ViewProjection, MAT4_SIZE};
use kiln_render::TransformMode;
use std::sync::Arc;

/// Mesh capacity of the dynamic model buffer, counted across all models.
pub const MAX_OBJECTS: usize = 10;

pub(crate) fn create_set_layout(
    device: &Arc<Device>,
    bindings: &[vk::DescriptorSetLayoutBinding<'_>],
) -> Result<Owned<vk::DescriptorSetLayout>> {
    let info = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    let layout = unsafe { device.create_descriptor_set_layout(&info, None) }
        .context("create_descriptor_set_layout")?;
    Ok(Owned::new(device, layout))
}

pub(crate) fn create_pool(
    device: &Arc<Device>,
    max_sets: u32,
    sizes: &[vk::DescriptorPoolSize],
) -> Result<Owned<vk::DescriptorPool>> {
    let info = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        max_sets,
        pool_size_count: sizes.len() as u32,
        p_pool_sizes: sizes.as_ptr(),
        ..Default::default()
    };
    let pool = unsafe { device.create_descriptor_pool(&info, None) }
        .context("create_descriptor_pool")?;
    Ok(Owned::new(device, pool))
}

pub(crate) fn allocate_sets(
    device: &Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    count: usize,
) -> Result<Vec<vk::DescriptorSet>> {
    let layouts = vec![layout; count];
    let info = vk::DescriptorSetAllocateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
        descriptor_pool: pool,
        descriptor_set_count: layouts.len() as u32,
        p_set_layouts: layouts.as_ptr(),
        ..Default::default()
    };
    Ok(unsafe { device.allocate_descriptor_sets(&info) }.context("allocate_descriptor_sets")?)
}

/// CPU copy of the dynamic model buffer, one matrix per slot.
pub struct ModelTransferSpace {
    stride: u64,
    bytes: Vec<u8>,
}

impl ModelTransferSpace {
    /// `min_alignment` is the device's `minUniformBufferOffsetAlignment`.
    pub fn new(min_alignment: u64) -> Self {
        let stride = align_up(MAT4_SIZE, min_alignment);
        Self {
            stride,
            bytes: vec![0; stride as usize * MAX_OBJECTS],
        }
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn write(&mut self, slot: usize, transform: &Mat4) -> Result<(), VkError> {
        if slot >= MAX_OBJECTS {
            return Err(VkError::TooManyObjects {
                requested: slot + 1,
                max: MAX_OBJECTS,
            });
        }
        let start = slot * self.stride as usize;
        self.bytes[start..start + MAT4_SIZE as usize].copy_from_slice(bytemuck::bytes_of(transform));
        Ok(())
    }

    pub fn read(&self, slot: usize) -> Option<Mat4> {
        if slot >= MAX_OBJECTS {
            return None;
        }
        let start = slot * self.stride as usize;
        Some(bytemuck::pod_read_unaligned(
            &self.bytes[start..start + MAT4_SIZE as usize],
        ))
    }
}

/// How model matrices reach the vertex shader. Chosen once, at setup.
pub enum TransformStrategy {
    PushConstant,
    DynamicUniform(ModelTransferSpace),
}

impl TransformStrategy {
    pub fn new(mode: TransformMode, min_alignment: u64) -> Self {
        match mode {
            TransformMode::PushConstant => TransformStrategy::PushConstant,
            TransformMode::DynamicUniform => {
                TransformStrategy::DynamicUniform(ModelTransferSpace::new(min_alignment))
            }
        }
    }

    pub fn mode(&self) -> TransformMode {
        match self {
            TransformStrategy::PushConstant => TransformMode::PushConstant,
            TransformStrategy::DynamicUniform(_) => TransformMode::DynamicUniform,
        }
    }

    /// None when the mesh count is unbounded.
    pub fn max_meshes(&self) -> Option<usize> {
        match self {
            TransformStrategy::PushConstant => None,
            TransformStrategy::DynamicUniform(_) => Some(MAX_OBJECTS),
        }
    }

    pub fn set_layout_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        let mut bindings = vec![vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        }];
        if let TransformStrategy::DynamicUniform(_) = self {
            bindings.push(vk::DescriptorSetLayoutBinding {
                binding: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::VERTEX,
                ..Default::default()
            });
        }
        bindings
    }

    pub fn pool_sizes(&self, image_count: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes = vec![vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: image_count,
        }];
        if let TransformStrategy::DynamicUniform(_) = self {
            sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: image_count,
            });
        }
        sizes
    }

    pub fn push_constant_ranges(&self) -> Vec<vk::PushConstantRange> {
        match self {
            TransformStrategy::PushConstant => vec![vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: MAT4_SIZE as u32,
            }],
            TransformStrategy::DynamicUniform(_) => Vec::new(),
        }
    }

    /// Copy every item's transform into its slot. No-op for push constants.
    pub fn stage<'a, B: BufferHandle + 'a>(
        &mut self,
        items: impl IntoIterator<Item = DrawItem<'a, B>>,
    ) -> Result<(), VkError> {
        if let TransformStrategy::DynamicUniform(space) = self {
            for item in items {
                space.write(item.slot, &item.transform)?;
            }
        }
        Ok(())
    }

    /// Byte offset for binding 1 when drawing `slot`.
    pub fn dynamic_offset(&self, slot: usize) -> Option<u32> {
        match self {
            TransformStrategy::PushConstant => None,
            TransformStrategy::DynamicUniform(space) => Some((space.stride() * slot as u64) as u32),
        }
    }

    /// Push-constant payload for a draw, if this strategy pushes.
    pub fn push_bytes<'a>(&self, transform: &'a Mat4) -> Option<&'a [u8]> {
        match self {
            TransformStrategy::PushConstant => Some(bytemuck::bytes_of(transform)),
            TransformStrategy::DynamicUniform(_) => None,
        }
    }

    fn transfer_space(&self) -> Option<&ModelTransferSpace> {
        match self {
            TransformStrategy::PushConstant => None,
            TransformStrategy::DynamicUniform(space) => Some(space),
        }
    }
}

/// What one image's set 0 buffers receive: the camera block and, in dynamic
/// mode, every staged model slot.
pub fn frame_bytes<'a>(
    vp: &'a ViewProjection,
    strategy: &'a TransformStrategy,
) -> (&'a [u8], Option<&'a [u8]>) {
    (
        bytemuck::bytes_of(vp),
        strategy.transfer_space().map(ModelTransferSpace::as_bytes),
    )
}

struct FrameUniforms {
    view_projection: GpuBuffer,
    models: Option<GpuBuffer>,
    set: vk::DescriptorSet,
}

/// Set 0 for every swapchain image plus the buffers behind it.
pub struct UniformSets {
    frames: Vec<FrameUniforms>,
    _pool: Owned<vk::DescriptorPool>,
    layout: Owned<vk::DescriptorSetLayout>,
}

impl UniformSets {
    pub fn new(device: &Arc<Device>, strategy: &TransformStrategy, image_count: usize) -> Result<Self> {
        let layout = create_set_layout(device, &strategy.set_layout_bindings())?;
        let pool = create_pool(device, image_count as u32, &strategy.pool_sizes(image_count as u32))?;
        let sets = allocate_sets(device, pool.raw(), layout.raw(), image_count)?;

        let vp_size = std::mem::size_of::<ViewProjection>() as vk::DeviceSize;
        let mut frames = Vec::with_capacity(image_count);
        for set in sets {
            let view_projection =
                GpuBuffer::host_visible(device, vp_size, vk::BufferUsageFlags::UNIFORM_BUFFER)?;
            let models = strategy
                .transfer_space()
                .map(|space| {
                    GpuBuffer::host_visible(device, space.size(), vk::BufferUsageFlags::UNIFORM_BUFFER)
                })
                .transpose()?;

            let vp_info = vk::DescriptorBufferInfo {
                buffer: view_projection.raw(),
                offset: 0,
                range: vp_size,
            };
            // Dynamic binding sees one matrix; the offset picks which
            let model_info = models.as_ref().map(|buf| vk::DescriptorBufferInfo {
                buffer: buf.raw(),
                offset: 0,
                range: MAT4_SIZE,
            });

            let mut writes = vec![vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &vp_info,
                ..Default::default()
            }];
            if let Some(info) = model_info.as_ref() {
                writes.push(vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: set,
                    dst_binding: 1,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                    p_buffer_info: info,
                    ..Default::default()
                });
            }
            unsafe { device.update_descriptor_sets(&writes, &[]) };

            frames.push(FrameUniforms {
                view_projection,
                models,
                set,
            });
        }

        Ok(Self {
            frames,
            _pool: pool,
            layout,
        })
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.raw()
    }

    pub fn set(&self, image: usize) -> vk::DescriptorSet {
        self.frames[image].set
    }

    /// Upload this frame's camera block and, in dynamic mode, the staged model slots.
    pub fn write(&self, image: usize, vp: &ViewProjection, strategy: &TransformStrategy) -> Result<()> {
        let frame = &self.frames[image];
        let (camera, models) = frame_bytes(vp, strategy);
        frame
            .view_projection
            .write(0, camera)
            .context("write view_projection")?;
        if let (Some(buf), Some(bytes)) = (frame.models.as_ref(), models) {
            buf.write(0, bytes).context("write model slots")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::{fake_mesh, FakeBuffer};
    use crate::mesh::MeshModel;
    use crate::scene::Scene;
    use kiln_math::Vec3;
    use kiln_render::ModelId;
    use std::cell::Cell;
    use std::rc::Rc;

    fn scene(released: &Rc<Cell<u32>>) -> Scene<FakeBuffer> {
        let mut scene = Scene::default();
        for _ in 0..2 {
            scene
                .add(MeshModel::new(vec![fake_mesh(released, true)]), Some(MAX_OBJECTS))
                .unwrap();
        }
        scene
    }

    fn spin(scene: &mut Scene<FakeBuffer>, frames: usize) -> [Mat4; 2] {
        let mut last = [Mat4::IDENTITY; 2];
        for n in 0..frames {
            for (i, slot) in last.iter_mut().enumerate() {
                let m = Mat4::from_translation(Vec3::new(i as f32 * 2.0 - 1.0, 0.0, -2.5))
                    * Mat4::from_rotation_z(n as f32 * 0.05);
                scene.update_model(ModelId(i), m);
                *slot = m;
            }
        }
        last
    }

    #[test]
    fn stride_rounds_to_device_alignment() {
        assert_eq!(ModelTransferSpace::new(256).stride(), 256);
        assert_eq!(ModelTransferSpace::new(64).stride(), 64);
        assert_eq!(ModelTransferSpace::new(16).stride(), 64);
        assert_eq!(ModelTransferSpace::new(0).stride(), 64);
        assert_eq!(ModelTransferSpace::new(256).size(), 256 * MAX_OBJECTS as u64);
    }

    #[test]
    fn slots_past_capacity_are_rejected() {
        let mut space = ModelTransferSpace::new(64);
        assert!(space.write(MAX_OBJECTS - 1, &Mat4::IDENTITY).is_ok());
        let err = space.write(MAX_OBJECTS, &Mat4::IDENTITY).unwrap_err();
        assert!(matches!(err, VkError::TooManyObjects { max: MAX_OBJECTS, .. }));
        assert_eq!(space.read(MAX_OBJECTS), None);
    }

    #[test]
    fn dynamic_slots_hold_latest_update() {
        let released = Rc::new(Cell::new(0));
        let mut scene = scene(&released);
        let last = spin(&mut scene, 12);

        let mut strategy = TransformStrategy::new(TransformMode::DynamicUniform, 256);
        strategy.stage(scene.draw_items()).unwrap();
        let space = strategy.transfer_space().unwrap();
        assert_eq!(space.read(0), Some(last[0]));
        assert_eq!(space.read(1), Some(last[1]));
        assert_eq!(strategy.dynamic_offset(1), Some(256));
        assert!(strategy.push_bytes(&last[0]).is_none());
    }

    #[test]
    fn push_records_hold_latest_update() {
        let released = Rc::new(Cell::new(0));
        let mut scene = scene(&released);
        let last = spin(&mut scene, 12);

        let mut strategy = TransformStrategy::new(TransformMode::PushConstant, 256);
        strategy.stage(scene.draw_items()).unwrap();
        let pushed: Vec<Vec<u8>> = scene
            .draw_items()
            .map(|item| strategy.push_bytes(&item.transform).unwrap().to_vec())
            .collect();
        assert_eq!(pushed[0], bytemuck::bytes_of(&last[0]));
        assert_eq!(pushed[1], bytemuck::bytes_of(&last[1]));
        assert_eq!(strategy.dynamic_offset(0), None);
    }

    #[test]
    fn frame_upload_carries_latest_camera() {
        let released = Rc::new(Cell::new(0));
        let mut scene = scene(&released);
        let last = spin(&mut scene, 3);

        let mut strategy = TransformStrategy::new(TransformMode::DynamicUniform, 64);
        strategy.stage(scene.draw_items()).unwrap();

        let start = kiln_math::Camera::default().view_projection(4.0 / 3.0);
        let (camera, models) = frame_bytes(&start, &strategy);
        assert_eq!(camera, bytemuck::bytes_of(&start));
        assert_eq!(models.map(<[u8]>::len), Some(64 * MAX_OBJECTS));

        let moved = kiln_math::Camera::default()
            .orbited(90.0)
            .view_projection(4.0 / 3.0);
        assert_ne!(moved, start);
        let (camera, models) = frame_bytes(&moved, &strategy);
        assert_eq!(camera, bytemuck::bytes_of(&moved));
        let models = models.unwrap();
        assert_eq!(&models[..64], bytemuck::bytes_of(&last[0]));

        let push = TransformStrategy::new(TransformMode::PushConstant, 64);
        let (camera, models) = frame_bytes(&moved, &push);
        assert_eq!(camera.len(), 128);
        assert!(models.is_none());
    }

    #[test]
    fn layout_follows_mode() {
        let push = TransformStrategy::new(TransformMode::PushConstant, 64);
        assert_eq!(push.set_layout_bindings().len(), 1);
        assert_eq!(push.pool_sizes(3).len(), 1);
        let ranges = push.push_constant_ranges();
        assert_eq!(ranges.len(), 1);
        assert_eq!((ranges[0].offset, ranges[0].size), (0, 64));
        assert_eq!(ranges[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(push.max_meshes(), None);

        let dynamic = TransformStrategy::new(TransformMode::DynamicUniform, 64);
        let bindings = dynamic.set_layout_bindings();
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC);
        assert_eq!(dynamic.pool_sizes(3)[1].descriptor_count, 3);
        assert!(dynamic.push_constant_ranges().is_empty());
        assert_eq!(dynamic.max_meshes(), Some(MAX_OBJECTS));
        assert_eq!(dynamic.mode(), TransformMode::DynamicUniform);
    }
}
