// SPDX-License-Identifier: CEPL-1.0
//! Render pass, per-image attachments and framebuffers.
//!
//! Deferred layout:
//!   attachment 0: swapchain colour, written by subpass 1
//!   attachment 1: offscreen colour, written by subpass 0, read by subpass 1
//!   attachment 2: depth, written by subpass 0, read by subpass 1
//! Forward layout drops attachment 1 and subpass 1.

use crate::context::Device;
use crate::descriptors::{allocate_sets, create_pool, create_set_layout};
use crate::handle::Owned;
use crate::memory::GpuImage;
use crate::swapchain::Swapchain;
use crate::VkError;
use anyhow::{Context, Result};
use ash::vk;
use kiln_render::PassLayout;
use std::sync::Arc;
use tracing::debug;

pub const OFFSCREEN_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate whose optimal tiling supports depth/stencil attachments.
pub fn first_supported_depth(
    candidates: &[vk::Format],
    props: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Result<vk::Format, VkError> {
    candidates
        .iter()
        .copied()
        .find(|&f| {
            props(f)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(VkError::NoSupportedDepthFormat)
}

pub fn find_depth_format(device: &Device) -> Result<vk::Format, VkError> {
    first_supported_depth(&DEPTH_CANDIDATES, |f| device.format_properties(f))
}

pub fn attachment_descriptions(
    layout: PassLayout,
    swap_format: vk::Format,
    depth_format: vk::Format,
) -> Vec<vk::AttachmentDescription> {
    let swap = vk::AttachmentDescription {
        format: swap_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let depth = vk::AttachmentDescription {
        format: depth_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ..Default::default()
    };
    match layout {
        PassLayout::Forward => vec![swap, depth],
        PassLayout::Deferred => {
            let offscreen = vk::AttachmentDescription {
                format: OFFSCREEN_FORMAT,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                ..Default::default()
            };
            vec![swap, offscreen, depth]
        }
    }
}

pub fn subpass_dependencies(layout: PassLayout) -> Vec<vk::SubpassDependency> {
    let last = match layout {
        PassLayout::Forward => 0,
        PassLayout::Deferred => 1,
    };
    let into_first = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        src_access_mask: vk::AccessFlags::MEMORY_READ,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dependency_flags: vk::DependencyFlags::empty(),
    };
    let out_of_last = vk::SubpassDependency {
        src_subpass: last,
        dst_subpass: vk::SUBPASS_EXTERNAL,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dst_access_mask: vk::AccessFlags::MEMORY_READ,
        dependency_flags: vk::DependencyFlags::empty(),
    };
    match layout {
        PassLayout::Forward => vec![into_first, out_of_last],
        PassLayout::Deferred => {
            // Subpass 1 reads what subpass 0 wrote at the same pixel
            let geometry_to_compose = vk::SubpassDependency {
                src_subpass: 0,
                dst_subpass: 1,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dst_access_mask: vk::AccessFlags::INPUT_ATTACHMENT_READ,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            };
            vec![into_first, geometry_to_compose, out_of_last]
        }
    }
}

pub fn create_render_pass(
    device: &Arc<Device>,
    layout: PassLayout,
    swap_format: vk::Format,
    depth_format: vk::Format,
) -> Result<Owned<vk::RenderPass>> {
    let attachments = attachment_descriptions(layout, swap_format, depth_format);
    let dependencies = subpass_dependencies(layout);

    let swap_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    // Geometry target: offscreen colour in deferred mode, the swapchain otherwise
    let (geometry_colour, depth_index) = match layout {
        PassLayout::Forward => (swap_ref, 1),
        PassLayout::Deferred => (
            vk::AttachmentReference {
                attachment: 1,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            },
            2,
        ),
    };
    let depth_ref = vk::AttachmentReference {
        attachment: depth_index,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let input_refs = [
        vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        },
        vk::AttachmentReference {
            attachment: 2,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        },
    ];

    let geometry = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &geometry_colour,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    let compose = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &swap_ref,
        input_attachment_count: input_refs.len() as u32,
        p_input_attachments: input_refs.as_ptr(),
        ..Default::default()
    };
    let subpasses = match layout {
        PassLayout::Forward => vec![geometry],
        PassLayout::Deferred => vec![geometry, compose],
    };

    let info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: subpasses.len() as u32,
        p_subpasses: subpasses.as_ptr(),
        dependency_count: dependencies.len() as u32,
        p_dependencies: dependencies.as_ptr(),
        ..Default::default()
    };
    let raw = unsafe { device.create_render_pass(&info, None) }.context("create_render_pass")?;
    debug!(
        "vk: render pass {:?} with {} attachments, {} subpasses",
        layout,
        attachments.len(),
        subpasses.len()
    );
    Ok(Owned::new(device, raw))
}

/// An image the render pass owns outright, plus its view.
pub struct Attachment {
    view: Owned<vk::ImageView>,
    _image: GpuImage,
}

impl Attachment {
    fn new(
        device: &Arc<Device>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let image = GpuImage::new(
            device,
            extent,
            format,
            vk::ImageTiling::OPTIMAL,
            usage,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let view = image.create_view(aspect)?;
        Ok(Self { view, _image: image })
    }

    pub fn view(&self) -> vk::ImageView {
        self.view.raw()
    }
}

/// Offscreen targets for one swapchain image.
pub struct FrameAttachments {
    pub colour: Option<Attachment>,
    pub depth: Attachment,
}

pub fn create_attachments(
    device: &Arc<Device>,
    layout: PassLayout,
    extent: vk::Extent2D,
    depth_format: vk::Format,
    count: usize,
) -> Result<Vec<FrameAttachments>> {
    let input = match layout {
        PassLayout::Forward => vk::ImageUsageFlags::empty(),
        PassLayout::Deferred => vk::ImageUsageFlags::INPUT_ATTACHMENT,
    };
    (0..count)
        .map(|_| {
            let colour = match layout {
                PassLayout::Forward => None,
                PassLayout::Deferred => Some(Attachment::new(
                    device,
                    extent,
                    OFFSCREEN_FORMAT,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | input,
                    vk::ImageAspectFlags::COLOR,
                )?),
            };
            let depth = Attachment::new(
                device,
                extent,
                depth_format,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | input,
                vk::ImageAspectFlags::DEPTH,
            )?;
            Ok(FrameAttachments { colour, depth })
        })
        .collect()
}

/// One framebuffer per swapchain image, attachments in render pass order.
pub fn create_framebuffers(
    device: &Arc<Device>,
    render_pass: vk::RenderPass,
    swapchain: &Swapchain,
    attachments: &[FrameAttachments],
) -> Result<Vec<Owned<vk::Framebuffer>>> {
    let extent = swapchain.extent();
    attachments
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            let mut views = vec![swapchain.view(i)];
            views.extend(frame.colour.as_ref().map(Attachment::view));
            views.push(frame.depth.view());
            let info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: views.len() as u32,
                p_attachments: views.as_ptr(),
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = unsafe { device.create_framebuffer(&info, None) }
                .with_context(|| format!("create_framebuffer[{i}]"))?;
            Ok(Owned::new(device, fb))
        })
        .collect()
}

/// Set 0 of the composition pipeline: colour and depth as input attachments.
pub struct InputAttachmentSets {
    sets: Vec<vk::DescriptorSet>,
    _pool: Owned<vk::DescriptorPool>,
    layout: Owned<vk::DescriptorSetLayout>,
}

impl InputAttachmentSets {
    pub fn new(device: &Arc<Device>, attachments: &[FrameAttachments]) -> Result<Self> {
        let bindings = [0, 1].map(|binding| vk::DescriptorSetLayoutBinding {
            binding,
            descriptor_type: vk::DescriptorType::INPUT_ATTACHMENT,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        });
        let layout = create_set_layout(device, &bindings)?;
        let count = attachments.len() as u32;
        let size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::INPUT_ATTACHMENT,
            descriptor_count: count * 2,
        };
        let pool = create_pool(device, count, std::slice::from_ref(&size))?;
        let sets = allocate_sets(device, pool.raw(), layout.raw(), attachments.len())?;

        for (&set, frame) in sets.iter().zip(attachments) {
            let colour = frame
                .colour
                .as_ref()
                .context("input attachments need the offscreen colour target")?;
            let infos = [colour.view(), frame.depth.view()].map(|view| vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            });
            let writes: Vec<vk::WriteDescriptorSet> = infos
                .iter()
                .enumerate()
                .map(|(binding, info)| vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: set,
                    dst_binding: binding as u32,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::INPUT_ATTACHMENT,
                    p_image_info: info,
                    ..Default::default()
                })
                .collect();
            unsafe { device.update_descriptor_sets(&writes, &[]) };
        }

        Ok(Self {
            sets,
            _pool: pool,
            layout,
        })
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.raw()
    }

    pub fn set(&self, image: usize) -> vk::DescriptorSet {
        self.sets[image]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props_with(supported: &[vk::Format]) -> impl Fn(vk::Format) -> vk::FormatProperties + '_ {
        move |f| vk::FormatProperties {
            optimal_tiling_features: if supported.contains(&f) {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    #[test]
    fn depth_format_follows_candidate_order() {
        let all = props_with(&DEPTH_CANDIDATES);
        assert_eq!(
            first_supported_depth(&DEPTH_CANDIDATES, all).unwrap(),
            vk::Format::D32_SFLOAT_S8_UINT
        );
        let some = [vk::Format::D24_UNORM_S8_UINT, vk::Format::D32_SFLOAT];
        assert_eq!(
            first_supported_depth(&DEPTH_CANDIDATES, props_with(&some)).unwrap(),
            vk::Format::D32_SFLOAT
        );
        assert!(matches!(
            first_supported_depth(&DEPTH_CANDIDATES, props_with(&[])),
            Err(VkError::NoSupportedDepthFormat)
        ));
    }

    #[test]
    fn deferred_has_three_attachments() {
        let a = attachment_descriptions(
            PassLayout::Deferred,
            vk::Format::B8G8R8A8_UNORM,
            vk::Format::D32_SFLOAT,
        );
        assert_eq!(a.len(), 3);
        assert_eq!(a[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(a[0].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(a[1].format, OFFSCREEN_FORMAT);
        assert_eq!(a[1].final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(a[2].format, vk::Format::D32_SFLOAT);
        assert_eq!(a[2].final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert!(a.iter().all(|d| d.load_op == vk::AttachmentLoadOp::CLEAR));
    }

    #[test]
    fn forward_skips_offscreen_colour() {
        let a = attachment_descriptions(
            PassLayout::Forward,
            vk::Format::B8G8R8A8_UNORM,
            vk::Format::D32_SFLOAT,
        );
        assert_eq!(a.len(), 2);
        assert_eq!(a[1].format, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn deferred_dependencies_chain_through_subpasses() {
        let d = subpass_dependencies(PassLayout::Deferred);
        assert_eq!(d.len(), 3);
        assert_eq!((d[0].src_subpass, d[0].dst_subpass), (vk::SUBPASS_EXTERNAL, 0));
        assert_eq!((d[1].src_subpass, d[1].dst_subpass), (0, 1));
        assert_eq!((d[2].src_subpass, d[2].dst_subpass), (1, vk::SUBPASS_EXTERNAL));
        assert_eq!(d[1].dependency_flags, vk::DependencyFlags::BY_REGION);
        assert_eq!(d[1].dst_access_mask, vk::AccessFlags::INPUT_ATTACHMENT_READ);
        assert_eq!(d[1].dst_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn forward_has_two_dependencies() {
        let d = subpass_dependencies(PassLayout::Forward);
        assert_eq!(d.len(), 2);
        assert_eq!(d[1].src_subpass, 0);
        assert_eq!(d[1].dst_subpass, vk::SUBPASS_EXTERNAL);
    }
}
