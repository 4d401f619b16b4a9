// SPDX-License-Identifier: CEPL-1.0
//! Owning wrappers for plain device-level handles.

use crate::context::Device;
use ash::vk;
use std::sync::Arc;

/// A handle that is released with a single `vkDestroy*` call on its device.
pub trait DeviceObject: Copy {
    /// # Safety
    /// `self` must have been created from `device` and must not be in use by the GPU.
    unsafe fn destroy(self, device: &ash::Device);
}

macro_rules! device_object {
    ($($ty:ty => $destroy:ident),* $(,)?) => {
        $(
            impl DeviceObject for $ty {
                unsafe fn destroy(self, device: &ash::Device) {
                    device.$destroy(self, None);
                }
            }
        )*
    };
}

device_object! {
    vk::CommandPool => destroy_command_pool,
    vk::DescriptorPool => destroy_descriptor_pool,
    vk::DescriptorSetLayout => destroy_descriptor_set_layout,
    vk::Fence => destroy_fence,
    vk::Framebuffer => destroy_framebuffer,
    vk::ImageView => destroy_image_view,
    vk::Pipeline => destroy_pipeline,
    vk::PipelineLayout => destroy_pipeline_layout,
    vk::RenderPass => destroy_render_pass,
    vk::Sampler => destroy_sampler,
    vk::Semaphore => destroy_semaphore,
    vk::ShaderModule => destroy_shader_module,
}

/// Destroys the wrapped handle when dropped. Keeps the device alive until then.
pub struct Owned<T: DeviceObject> {
    device: Arc<Device>,
    raw: T,
}

impl<T: DeviceObject> Owned<T> {
    pub fn new(device: &Arc<Device>, raw: T) -> Self {
        Self {
            device: Arc::clone(device),
            raw,
        }
    }

    #[inline]
    pub fn raw(&self) -> T {
        self.raw
    }
}

impl<T: DeviceObject> Drop for Owned<T> {
    fn drop(&mut self) {
        unsafe { self.raw.destroy(&self.device) }
    }
}

impl<T: DeviceObject + std::fmt::Debug> std::fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Owned").field(&self.raw).finish()
    }
}
