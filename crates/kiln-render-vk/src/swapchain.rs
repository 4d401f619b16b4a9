// SPDX-License-Identifier: CEPL-1.0
use crate::context::{Device, QueueFamilies, Surface};
use crate::handle::Owned;
use crate::memory::create_image_view;
use anyhow::{Context, Result};
use ash::vk;
use kiln_render::RenderSize;
use std::sync::Arc;
use tracing::{info, warn};

const PREFERRED: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::R8G8B8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// A lone UNDEFINED entry means the surface takes anything.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    match formats {
        [] => PREFERRED,
        [only] if only.format == vk::Format::UNDEFINED => PREFERRED,
        _ => formats
            .iter()
            .copied()
            .find(|f| {
                matches!(f.format, vk::Format::R8G8B8A8_UNORM | vk::Format::B8G8R8A8_UNORM)
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .unwrap_or(formats[0]),
    }
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum; `max_image_count == 0` means no upper bound.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        wanted
    } else {
        wanted.min(caps.max_image_count)
    }
}

/// Sharing mode and the families to list for it.
pub fn sharing(families: &QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

pub struct Swapchain {
    views: Vec<Owned<vk::ImageView>>,
    images: Vec<vk::Image>,
    raw: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    device: Arc<Device>,
}

impl Swapchain {
    pub fn new(device: &Arc<Device>, surface: &Surface, size: RenderSize) -> Result<Self> {
        let loader = surface.loader();
        let (caps, formats, modes) = unsafe {
            (
                loader
                    .get_physical_device_surface_capabilities(device.phys, surface.raw())
                    .context("get_physical_device_surface_capabilities")?,
                loader
                    .get_physical_device_surface_formats(device.phys, surface.raw())
                    .context("get_physical_device_surface_formats")?,
                loader
                    .get_physical_device_surface_present_modes(device.phys, surface.raw())
                    .context("get_physical_device_surface_present_modes")?,
            )
        };

        let surface_format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&modes);
        let extent = choose_extent(&caps, size);
        let (sharing_mode, family_indices) = sharing(&device.families);

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.raw(),
            min_image_count: choose_image_count(&caps),
            image_format: surface_format.format,
            image_color_space: surface_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_indices.len() as u32,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };
        let raw = unsafe { device.swapchain_loader.create_swapchain(&info, None) }
            .context("create_swapchain")?;

        let mut swapchain = Swapchain {
            views: Vec::new(),
            images: Vec::new(),
            raw,
            format: surface_format.format,
            extent,
            device: Arc::clone(device),
        };
        swapchain.images = unsafe { device.swapchain_loader.get_swapchain_images(raw) }
            .context("get_swapchain_images")?;
        for &image in &swapchain.images {
            let view = create_image_view(
                device,
                image,
                swapchain.format,
                vk::ImageAspectFlags::COLOR,
            )?;
            swapchain.views.push(view);
        }

        info!(
            "vk: swapchain {}x{} fmt {:?} {:?}, {} images",
            extent.width,
            extent.height,
            swapchain.format,
            present_mode,
            swapchain.images.len()
        );
        Ok(swapchain)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn view(&self, index: usize) -> vk::ImageView {
        self.views[index].raw()
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }


    /// Blocks until an image is free; `signal` fires once it can be written.
    pub fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<u32> {
        let acquired = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.raw,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    warn!("vk: swapchain is suboptimal for the surface");
                }
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                warn!("vk: swapchain out of date on acquire; recreation is not supported");
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR).context("acquire_next_image")
            }
            Err(e) => Err(e).context("acquire_next_image"),
        }
    }

    pub fn present(&self, queue: vk::Queue, wait: vk::Semaphore, index: u32) -> Result<()> {
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.raw,
            p_image_indices: &index,
            ..Default::default()
        };
        match unsafe { self.device.swapchain_loader.queue_present(queue, &info) } {
            Ok(suboptimal) => {
                if suboptimal {
                    warn!("vk: present reported a suboptimal swapchain");
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                warn!("vk: swapchain out of date on present; recreation is not supported");
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR).context("queue_present")
            }
            Err(e) => Err(e).context("queue_present"),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.views.clear();
        unsafe { self.device.swapchain_loader.destroy_swapchain(self.raw, None) };
    }
}
