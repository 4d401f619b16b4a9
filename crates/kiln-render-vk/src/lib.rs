// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use kiln_math::{Mat4, ViewProjection};
use kiln_render::{ModelId, PassLayout, RawMesh, RenderSize, Renderer, RendererConfig, TextureId};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use tracing::{debug, info};

pub mod context;
pub mod descriptors;
mod error;
pub mod frame;
pub mod handle;
pub mod memory;
pub mod mesh;
pub mod pipeline;
pub mod render_pass;
pub mod scene;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod upload;

pub use error::VkError;

use context::{Device, Instance, Surface};
use descriptors::{TransformStrategy, UniformSets};
use handle::Owned;
use mesh::{Mesh, MeshModel};
use pipeline::{GraphicsPipeline, PipelineBuilder};
use render_pass::{FrameAttachments, InputAttachmentSets};
use scene::Scene;
use swapchain::Swapchain;
use sync::FrameSync;
use texture::TextureBank;
use upload::Uploader;

/// Vulkan backend. Fields drop top to bottom: scene content, per-image
/// objects, pipelines, swapchain, surface, device.
pub struct VkRenderer {
    scene: Scene,
    composition: Option<GraphicsPipeline>,
    geometry: GraphicsPipeline,
    sync: FrameSync,
    command_buffers: Vec<vk::CommandBuffer>,
    _command_pool: Owned<vk::CommandPool>,
    framebuffers: Vec<Owned<vk::Framebuffer>>,
    inputs: Option<InputAttachmentSets>,
    _attachments: Vec<FrameAttachments>,
    uniforms: UniformSets,
    textures: TextureBank,
    uploader: Uploader,
    render_pass: Owned<vk::RenderPass>,
    swapchain: Swapchain,
    _surface: Surface,
    device: Arc<Device>,

    strategy: TransformStrategy,
    pass_layout: PassLayout,
    clear: [f32; 4],
    view_projection: ViewProjection,
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe { self.device.device_wait_idle().ok() };
        self.scene.destroy();
        debug!("vk: renderer torn down");
    }
}

impl VkRenderer {
    /// Acquire an image and get its uniforms and command buffer ready.
    fn prepare_frame(&mut self) -> Result<u32> {
        let image = self
            .swapchain
            .acquire_next_image(self.sync.image_available())?;
        self.sync.claim_image(image)?;

        self.strategy
            .stage(self.scene.draw_items())
            .context("stage model transforms")?;
        self.uniforms
            .write(image as usize, &self.view_projection, &self.strategy)?;
        self.record_commands(image as usize)?;
        Ok(image)
    }

    fn submit(&self, image: u32) -> Result<()> {
        let wait = [self.sync.image_available()];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal = [self.sync.render_finished(image)];
        let cmd = self.command_buffers[image as usize];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait.len() as u32,
            p_wait_semaphores: wait.as_ptr(),
            p_wait_dst_stage_mask: stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: signal.len() as u32,
            p_signal_semaphores: signal.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device.queue_submit(
                self.device.graphics_queue,
                std::slice::from_ref(&submit),
                self.sync.in_flight_fence(),
            )
        }
        .context("queue_submit")
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RendererConfig,
    ) -> Result<Self> {
        let dh = display.display_handle()?.as_raw();
        let instance = Instance::new(dh, cfg.validation)?;
        let surface = Surface::new(&instance, window, display)?;
        let device = Device::new(&instance, &surface)?;

        let swapchain = Swapchain::new(&device, &surface, size)?;
        let image_count = swapchain.image_count();
        let extent = swapchain.extent();

        let depth_format = render_pass::find_depth_format(&device)?;
        let render_pass =
            render_pass::create_render_pass(&device, cfg.pass_layout, swapchain.format(), depth_format)?;
        let attachments =
            render_pass::create_attachments(&device, cfg.pass_layout, extent, depth_format, image_count)?;
        let framebuffers =
            render_pass::create_framebuffers(&device, render_pass.raw(), &swapchain, &attachments)?;
        let inputs = match cfg.pass_layout {
            PassLayout::Forward => None,
            PassLayout::Deferred => Some(InputAttachmentSets::new(&device, &attachments)?),
        };

        let strategy = TransformStrategy::new(
            cfg.transform_mode,
            device.limits.min_uniform_buffer_offset_alignment,
        );
        let uniforms = UniformSets::new(&device, &strategy, image_count)?;
        let uploader = Uploader::new(&device)?;
        let textures = TextureBank::new(&uploader, &cfg.texture_dir)?;

        let builder = PipelineBuilder::new(&device, render_pass.raw(), extent, cfg.shader_dir.as_deref());
        let geometry = builder.geometry(
            strategy.mode(),
            &[uniforms.layout(), textures.layout()],
            &strategy.push_constant_ranges(),
        )?;
        let composition = inputs
            .as_ref()
            .map(|i| builder.composition(i.layout()))
            .transpose()?;

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: device.families.graphics,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("create_command_pool")?;
        let command_pool = Owned::new(&device, command_pool);
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: command_pool.raw(),
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: image_count as u32,
            ..Default::default()
        };
        let command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("allocate_command_buffers")?;

        let sync = FrameSync::new(&device, image_count)?;
        let view_projection = cfg.camera.view_projection(
            RenderSize {
                width: extent.width,
                height: extent.height,
            }
            .aspect(),
        );

        info!(
            "Vulkan renderer ready ({}x{}, {} images, {:?}, {:?})",
            extent.width, extent.height, image_count, cfg.pass_layout, cfg.transform_mode
        );

        Ok(VkRenderer {
            scene: Scene::default(),
            composition,
            geometry,
            sync,
            command_buffers,
            _command_pool: command_pool,
            framebuffers,
            inputs,
            _attachments: attachments,
            uniforms,
            textures,
            uploader,
            render_pass,
            swapchain,
            _surface: surface,
            device,
            strategy,
            pass_layout: cfg.pass_layout,
            clear: cfg.clear_color,
            view_projection,
        })
    }

    fn draw(&mut self) -> Result<()> {
        // 1-2: wait for this slot's last frame, retire it, reset its fence
        self.sync.begin_frame()?;

        // 3-4: acquire, then upload uniforms and re-record
        let image = match self.prepare_frame() {
            Ok(image) => image,
            Err(e) => {
                self.sync.ring_mut().abandon();
                return Err(e);
            }
        };

        // 5: submit
        self.submit(image)?;
        self.sync.ring_mut().submitted();

        // 6: present
        self.swapchain.present(
            self.device.present_queue,
            self.sync.render_finished(image),
            image,
        )?;

        // 7: next slot
        self.sync.ring_mut().presented();
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }

    fn set_view_projection(&mut self, view_projection: ViewProjection) {
        self.view_projection = view_projection;
    }

    fn create_texture(&mut self, filename: &str) -> Result<TextureId> {
        self.textures
            .create_texture(&self.uploader, filename)
            .with_context(|| format!("create_texture({filename})"))
    }

    fn add_model(&mut self, meshes: &[RawMesh], textures: &[TextureId]) -> Result<ModelId> {
        let max = self.strategy.max_meshes();
        self.scene.check_capacity(meshes.len(), max)?;
        if let Some(&bad) = textures.iter().find(|&&id| !self.textures.contains(id)) {
            return Err(VkError::UnknownTexture(bad).into());
        }

        let uploaded = meshes
            .iter()
            .map(|raw| {
                let texture = raw
                    .material
                    .and_then(|m| textures.get(m).copied())
                    .unwrap_or(TextureId::DEFAULT);
                Mesh::upload(&self.uploader, raw, texture)
            })
            .collect::<Result<Vec<_>>>()
            .context("upload meshes")?;

        let id = self.scene.add(MeshModel::new(uploaded), max)?;
        info!("model {:?} added ({} meshes)", id, meshes.len());
        Ok(id)
    }

    fn update_model(&mut self, id: ModelId, transform: Mat4) {
        if !self.scene.update_model(id, transform) {
            debug!("update_model: no model {:?}", id);
        }
    }

    fn model_count(&self) -> usize {
        self.scene.model_count()
    }
}
