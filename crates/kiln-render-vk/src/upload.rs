// SPDX-License-Identifier: CEPL-1.0
//! Staged uploads into device-local memory.
//!
//! Every call is a full round trip: record a one-time command buffer, submit
//! it on the graphics queue and block on `queue_wait_idle`. Only used while
//! loading, never inside the frame loop.

use crate::context::Device;
use crate::handle::Owned;
use crate::memory::{BufferHandle, GpuBuffer, GpuImage};
use crate::VkError;
use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use kiln_render::decode::DecodedImage;
use std::sync::Arc;
use tracing::trace;

/// Format of every uploaded texture.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub struct Uploader {
    pool: Owned<vk::CommandPool>,
    device: Arc<Device>,
}

impl Uploader {
    pub fn new(device: &Arc<Device>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: device.families.graphics,
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            ..Default::default()
        };
        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("create_command_pool(upload)")?;
        Ok(Self {
            pool: Owned::new(device, pool),
            device: Arc::clone(device),
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Copy `data` into a new device-local buffer with `usage | TRANSFER_DST`.
    /// Empty input allocates nothing.
    pub fn upload_buffer<T: Pod>(
        &self,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Option<GpuBuffer>> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.is_empty() {
            return Ok(None);
        }
        let size = bytes.len() as vk::DeviceSize;

        // 1) staging (HOST_VISIBLE|COHERENT), map + copy
        let staging = self.staging(bytes)?;

        // 2) destination
        let dst = GpuBuffer::new(
            &self.device,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        // 3) copy and wait; staging is released on return
        self.one_shot("copy_buffer", |cmd| unsafe {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            self.device
                .cmd_copy_buffer(cmd, staging.raw(), dst.raw(), std::slice::from_ref(&region));
        })?;
        trace!("uploaded {} bytes ({:?})", size, usage);
        Ok(Some(dst))
    }

    /// Upload RGBA8 pixels into a sampled, shader-read-only image.
    pub fn upload_image(&self, pixels: &DecodedImage) -> Result<GpuImage> {
        let extent = vk::Extent2D {
            width: pixels.width,
            height: pixels.height,
        };
        let image = GpuImage::new(
            &self.device,
            extent,
            TEXTURE_FORMAT,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        if image.is_null() {
            return Ok(image);
        }
        let staging = self.staging(&pixels.pixels[..pixels.byte_len()])?;

        self.transition(
            image.raw(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        self.one_shot("copy_buffer_to_image", |cmd| unsafe {
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                image_extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
            };
            self.device.cmd_copy_buffer_to_image(
                cmd,
                staging.raw(),
                image.raw(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
        })?;
        self.transition(
            image.raw(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        Ok(image)
    }

    fn staging(&self, bytes: &[u8]) -> Result<GpuBuffer> {
        let staging = GpuBuffer::host_visible(
            &self.device,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        staging.write(0, bytes)?;
        Ok(staging)
    }

    fn transition(&self, image: vk::Image, from: vk::ImageLayout, to: vk::ImageLayout) -> Result<()> {
        let masks = transition_masks(from, to)?;
        self.one_shot("layout_transition", |cmd| unsafe {
            let barrier = vk::ImageMemoryBarrier {
                s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
                src_access_mask: masks.src_access,
                dst_access_mask: masks.dst_access,
                old_layout: from,
                new_layout: to,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                image,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            self.device.cmd_pipeline_barrier(
                cmd,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&barrier),
            );
        })
    }

    /// Record with `record`, submit, wait for the queue to idle, free the buffer.
    fn one_shot(&self, label: &str, record: impl FnOnce(vk::CommandBuffer)) -> Result<()> {
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool.raw(),
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = unsafe { self.device.allocate_command_buffers(&ai) }
            .with_context(|| format!("allocate_command_buffers({label})"))?[0];

        let result = unsafe { self.submit_and_wait(cmd, record) };
        unsafe {
            self.device
                .free_command_buffers(self.pool.raw(), std::slice::from_ref(&cmd))
        };
        result.with_context(|| format!("one-shot {label}"))
    }

    unsafe fn submit_and_wait(
        &self,
        cmd: vk::CommandBuffer,
        record: impl FnOnce(vk::CommandBuffer),
    ) -> Result<()> {
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        self.device.begin_command_buffer(cmd, &bi)?;
        record(cmd);
        self.device.end_command_buffer(cmd)?;

        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        let queue = self.device.graphics_queue;
        self.device
            .queue_submit(queue, std::slice::from_ref(&si), vk::Fence::null())?;
        self.device.queue_wait_idle(queue)?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Access and stage masks for the two transitions a texture upload needs.
pub fn transition_masks(from: vk::ImageLayout, to: vk::ImageLayout) -> Result<TransitionMasks, VkError> {
    use vk::ImageLayout as L;
    match (from, to) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        _ => Err(VkError::UnsupportedLayoutTransition { from, to }),
    }
}
