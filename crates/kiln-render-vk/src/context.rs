// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface and logical device bring-up. One shot at startup.

use crate::VkError;
use anyhow::{Context as _, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_char, c_void, CStr};
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const APP_NAME: &CStr = c"kiln";

/// Validation messages are diagnostics only; never abort on them.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{:?}: {}", types, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{:?}: {}", types, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{:?}: {}", types, msg);
    } else {
        trace!(target: "vulkan", "{:?}: {}", types, msg);
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    raw: vk::DebugUtilsMessengerEXT,
}

pub struct Instance {
    entry: Entry,
    raw: ash::Instance,
    debug: Option<DebugMessenger>,
}

impl Instance {
    pub fn new(display: RawDisplayHandle, want_validation: bool) -> Result<Arc<Self>> {
        let entry = Entry::linked();

        let mut extensions = ash_window::enumerate_required_extensions(display)
            .context("enumerate_required_extensions")?
            .to_vec();

        let validation = want_validation && unsafe { has_validation_layer(&entry)? };
        if want_validation && !validation {
            warn!("validation requested but {:?} is not installed; continuing without it", VALIDATION_LAYER);
        }
        if validation {
            extensions.push(debug_utils::NAME.as_ptr());
        }
        let layers: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: APP_NAME.as_ptr(),
            application_version: 0,
            p_engine_name: APP_NAME.as_ptr(),
            engine_version: 0,
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };
        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            enabled_layer_count: layers.len() as u32,
            pp_enabled_layer_names: layers.as_ptr(),
            ..Default::default()
        };
        let raw = unsafe { entry.create_instance(&create_info, None) }.context("create_instance")?;

        // Wrap now so the instance is destroyed if the messenger fails
        let mut instance = Instance {
            entry,
            raw,
            debug: None,
        };
        if validation {
            let loader = debug_utils::Instance::new(&instance.entry, &instance.raw);
            let ci = vk::DebugUtilsMessengerCreateInfoEXT {
                s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
                message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                pfn_user_callback: Some(debug_callback),
                ..Default::default()
            };
            let raw = unsafe { loader.create_debug_utils_messenger(&ci, None) }
                .context("create_debug_utils_messenger")?;
            instance.debug = Some(DebugMessenger { loader, raw });
        }

        info!("vk: instance created (validation={})", validation);
        Ok(Arc::new(instance))
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.raw
    }
}

unsafe fn has_validation_layer(entry: &Entry) -> Result<bool> {
    let layers = entry
        .enumerate_instance_layer_properties()
        .context("enumerate_instance_layer_properties")?;
    Ok(layers
        .iter()
        .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER))
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some(dbg) = self.debug.take() {
                dbg.loader.destroy_debug_utils_messenger(dbg.raw, None);
            }
            self.raw.destroy_instance(None);
        }
        debug!("vk: instance destroyed");
    }
}

pub struct Surface {
    instance: Arc<Instance>,
    loader: surface::Instance,
    raw: vk::SurfaceKHR,
}

impl Surface {
    pub fn new(
        instance: &Arc<Instance>,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .as_raw();
        let loader = surface::Instance::new(instance.entry(), instance.raw());
        let raw = unsafe { ash_window::create_surface(instance.entry(), instance.raw(), dh, wh, None) }
            .context("ash_window::create_surface")?;
        Ok(Surface {
            instance: Arc::clone(instance),
            loader,
            raw,
        })
    }

    pub fn loader(&self) -> &surface::Instance {
        &self.loader
    }

    pub fn raw(&self) -> vk::SurfaceKHR {
        self.raw
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.raw, None) };
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Prefer one family doing both graphics and present; otherwise the first of each.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> Option<QueueFamilies> {
    let graphics: Vec<u32> = families
        .iter()
        .enumerate()
        .filter(|(_, q)| q.queue_count > 0 && q.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(i, _)| i as u32)
        .collect();

    if let Some(&both) = graphics.iter().find(|&&i| supports_present(i)) {
        return Some(QueueFamilies {
            graphics: both,
            present: both,
        });
    }
    let present = (0..families.len() as u32).find(|&i| supports_present(i))?;
    Some(QueueFamilies {
        graphics: *graphics.first()?,
        present,
    })
}

/// Logical device plus everything we queried about its physical device.
pub struct Device {
    raw: ash::Device,
    instance: Arc<Instance>,
    pub phys: vk::PhysicalDevice,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub limits: vk::PhysicalDeviceLimits,
    /// Max sampler anisotropy when the feature was enabled.
    pub anisotropy: Option<f32>,
    pub swapchain_loader: swapchain::Device,
}

impl Device {
    pub fn new(instance: &Arc<Instance>, surface: &Surface) -> Result<Arc<Self>> {
        let (phys, families) = unsafe { pick_physical_device(instance.raw(), surface)? };
        let inst = instance.raw();

        let props = unsafe { inst.get_physical_device_properties(phys) };
        let features = unsafe { inst.get_physical_device_features(phys) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();
        info!(
            "vk: using {} (graphics family {}, present family {})",
            name, families.graphics, families.present
        );

        let priorities = [1.0_f32];
        let mut unique = vec![families.graphics];
        if !families.is_shared() {
            unique.push(families.present);
        }
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique
            .iter()
            .map(|&family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let enabled = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: features.sampler_anisotropy,
            ..Default::default()
        };
        let extensions = [swapchain::NAME.as_ptr()];
        let create_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            p_enabled_features: &enabled,
            ..Default::default()
        };
        let raw = unsafe { inst.create_device(phys, &create_info, None) }.context("create_device")?;

        let graphics_queue = unsafe { raw.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { raw.get_device_queue(families.present, 0) };
        let memory_properties = unsafe { inst.get_physical_device_memory_properties(phys) };
        let swapchain_loader = swapchain::Device::new(inst, &raw);

        Ok(Arc::new(Device {
            raw,
            instance: Arc::clone(instance),
            phys,
            families,
            graphics_queue,
            present_queue,
            memory_properties,
            limits: props.limits,
            anisotropy: (features.sampler_anisotropy == vk::TRUE)
                .then_some(props.limits.max_sampler_anisotropy),
            swapchain_loader,
        }))
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .raw()
                .get_physical_device_format_properties(self.phys, format)
        }
    }
}

impl Deref for Device {
    type Target = ash::Device;

    fn deref(&self) -> &ash::Device {
        &self.raw
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.raw.device_wait_idle() {
                error!("vk: device_wait_idle during teardown: {e:?}");
            }
            self.raw.destroy_device(None);
        }
        debug!("vk: device destroyed");
    }
}

unsafe fn pick_physical_device(
    instance: &ash::Instance,
    surface: &Surface,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    for phys in instance.enumerate_physical_devices()? {
        let qprops = instance.get_physical_device_queue_family_properties(phys);
        let families = find_queue_families(&qprops, |i| {
            surface
                .loader()
                .get_physical_device_surface_support(phys, i, surface.raw())
                .unwrap_or(false)
        });
        let Some(families) = families else { continue };

        let has_swapchain = instance
            .enumerate_device_extension_properties(phys)
            .unwrap_or_default()
            .iter()
            .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME);
        if !has_swapchain {
            warn!("vk: skipping device without {:?}", swapchain::NAME);
            continue;
        }

        let formats = surface
            .loader()
            .get_physical_device_surface_formats(phys, surface.raw())
            .unwrap_or_default();
        let modes = surface
            .loader()
            .get_physical_device_surface_present_modes(phys, surface.raw())
            .unwrap_or_default();
        if formats.is_empty() || modes.is_empty() {
            continue;
        }
        return Ok((phys, families));
    }
    Err(VkError::NoSuitableDevice.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_shared_family() {
        let fams = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
        ];
        let got = find_queue_families(&fams, |i| i != 0).unwrap();
        assert_eq!(got, QueueFamilies { graphics: 2, present: 2 });
        assert!(got.is_shared());
    }

    #[test]
    fn falls_back_to_separate_present_family() {
        let fams = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let got = find_queue_families(&fams, |i| i == 1).unwrap();
        assert_eq!(got, QueueFamilies { graphics: 0, present: 1 });
        assert!(!got.is_shared());
    }

    #[test]
    fn none_without_graphics_or_present() {
        let compute_only = [family(vk::QueueFlags::COMPUTE)];
        assert!(find_queue_families(&compute_only, |_| true).is_none());
        let no_present = [family(vk::QueueFlags::GRAPHICS)];
        assert!(find_queue_families(&no_present, |_| false).is_none());
    }
}
