// SPDX-License-Identifier: CEPL-1.0
//! Buffer and image allocation with dedicated device memory.

use crate::context::Device;
use crate::handle::Owned;
use crate::VkError;
use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

/// First memory type allowed by `type_bits` whose flags contain `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, VkError> {
    (0..props.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize].property_flags.contains(required)
        })
        .ok_or(VkError::NoCompatibleMemoryType {
            type_bits,
            required,
        })
}

fn allocate(
    device: &Device,
    req: vk::MemoryRequirements,
    props: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(&device.memory_properties, req.memory_type_bits, props)?;
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index,
        ..Default::default()
    };
    Ok(unsafe { device.allocate_memory(&mai, None) }.context("allocate_memory")?)
}

/// Anything the draw path can bind as a vertex or index buffer.
pub trait BufferHandle {
    fn raw(&self) -> vk::Buffer;
}

/// A buffer and its own memory block, released together.
pub struct GpuBuffer {
    device: Arc<Device>,
    raw: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn new(
        device: &Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let raw = unsafe { device.create_buffer(&bci, None) }.context("create_buffer")?;

        // Memory starts null: an early return below still destroys the buffer
        let mut buffer = GpuBuffer {
            device: Arc::clone(device),
            raw,
            memory: vk::DeviceMemory::null(),
            size,
        };
        let req = unsafe { device.get_buffer_memory_requirements(raw) };
        buffer.memory = allocate(device, req, props)?;
        unsafe { device.bind_buffer_memory(raw, buffer.memory, 0) }.context("bind_buffer_memory")?;
        Ok(buffer)
    }

    /// Host-visible, coherent: written with [`GpuBuffer::write`], no flushes needed.
    pub fn host_visible(
        device: &Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        Self::new(
            device,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Map, copy, unmap. Only valid on host-visible memory.
    pub fn write<T: Pod>(&self, offset: vk::DeviceSize, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let len = bytes.len() as vk::DeviceSize;
        if len == 0 {
            return Ok(());
        }
        if offset + len > self.size {
            return Err(VkError::BufferOverrun {
                offset,
                len,
                size: self.size,
            }
            .into());
        }
        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, offset, len, vk::MemoryMapFlags::empty())
                .context("map_memory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }
}

impl BufferHandle for GpuBuffer {
    fn raw(&self) -> vk::Buffer {
        self.raw
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.raw, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// A 2D single-mip image and its own memory block.
pub struct GpuImage {
    device: Arc<Device>,
    raw: vk::Image,
    memory: vk::DeviceMemory,
    format: vk::Format,
}

impl GpuImage {
    /// A zero-sized request yields a null image rather than an error.
    pub fn new(
        device: &Arc<Device>,
        extent: vk::Extent2D,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let mut image = GpuImage {
            device: Arc::clone(device),
            raw: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            format,
        };
        if extent.width == 0 || extent.height == 0 {
            return Ok(image);
        }

        let ici = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        image.raw = unsafe { device.create_image(&ici, None) }.context("create_image")?;
        let req = unsafe { device.get_image_memory_requirements(image.raw) };
        image.memory = allocate(device, req, props)?;
        unsafe { device.bind_image_memory(image.raw, image.memory, 0) }.context("bind_image_memory")?;
        Ok(image)
    }

    pub fn is_null(&self) -> bool {
        self.raw == vk::Image::null()
    }

    pub fn raw(&self) -> vk::Image {
        self.raw
    }

    pub fn create_view(&self, aspect: vk::ImageAspectFlags) -> Result<Owned<vk::ImageView>> {
        create_image_view(&self.device, self.raw, self.format, aspect)
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        // vkDestroyImage / vkFreeMemory accept null handles
        unsafe {
            self.device.destroy_image(self.raw, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

pub fn create_image_view(
    device: &Arc<Device>,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<Owned<vk::ImageView>> {
    let view_ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    let view = unsafe { device.create_image_view(&view_ci, None) }.context("create_image_view")?;
    Ok(Owned::new(device, view))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            p.memory_types[i].property_flags = flags;
        }
        p
    }

    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn first_matching_type_wins() {
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST,
            HOST | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        assert_eq!(find_memory_type(&p, 0b111, HOST).unwrap(), 1);
        assert_eq!(
            find_memory_type(&p, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn respects_allowed_type_bits() {
        let p = props(&[HOST, HOST]);
        assert_eq!(find_memory_type(&p, 0b10, HOST).unwrap(), 1);
    }

    #[test]
    fn no_match_is_an_error() {
        let p = props(&[HOST]);
        let err = find_memory_type(&p, 0b1, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap_err();
        assert!(matches!(err, VkError::NoCompatibleMemoryType { type_bits: 1, .. }));
        let err = find_memory_type(&p, 0b10, HOST).unwrap_err();
        assert!(matches!(err, VkError::NoCompatibleMemoryType { .. }));
    }
}
