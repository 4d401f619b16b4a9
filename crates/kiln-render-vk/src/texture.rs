// SPDX-License-Identifier: CEPL-1.0
use crate::descriptors::{allocate_sets, create_pool, create_set_layout};
use crate::handle::Owned;
use crate::memory::GpuImage;
use crate::upload::Uploader;
use crate::VkError;
use anyhow::{Context, Result};
use ash::vk;
use kiln_render::decode::{decode_rgba, DecodedImage};
use kiln_render::{AssetError, TextureId};
use std::path::{Path, PathBuf};
use tracing::info;

/// Descriptor pool capacity, default texture included.
pub const MAX_TEXTURES: usize = 64;

struct TextureEntry {
    _view: Owned<vk::ImageView>,
    _image: GpuImage,
    set: vk::DescriptorSet,
}

/// Sampled textures, each with its own set 1 descriptor.
///
/// Slot 0 is a 1x1 opaque white image so [`TextureId::DEFAULT`] leaves the
/// vertex colour untouched.
pub struct TextureBank {
    entries: Vec<TextureEntry>,
    sampler: Owned<vk::Sampler>,
    pool: Owned<vk::DescriptorPool>,
    layout: Owned<vk::DescriptorSetLayout>,
    dir: PathBuf,
}

impl TextureBank {
    pub fn new(uploader: &Uploader, dir: impl Into<PathBuf>) -> Result<Self> {
        let device = uploader.device();
        let binding = vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        };
        let layout = create_set_layout(device, std::slice::from_ref(&binding))?;
        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: MAX_TEXTURES as u32,
        };
        let pool = create_pool(device, MAX_TEXTURES as u32, std::slice::from_ref(&pool_size))?;

        let sampler_info = vk::SamplerCreateInfo {
            s_type: vk::StructureType::SAMPLER_CREATE_INFO,
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            anisotropy_enable: device.anisotropy.is_some().into(),
            max_anisotropy: device.anisotropy.unwrap_or(1.0),
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            unnormalized_coordinates: vk::FALSE,
            compare_enable: vk::FALSE,
            compare_op: vk::CompareOp::ALWAYS,
            ..Default::default()
        };
        let sampler = unsafe { device.create_sampler(&sampler_info, None) }.context("create_sampler")?;

        let mut bank = TextureBank {
            entries: Vec::new(),
            sampler: Owned::new(device, sampler),
            pool,
            layout,
            dir: dir.into(),
        };
        bank.insert(uploader, &DecodedImage::solid([255, 255, 255, 255]))
            .context("default texture")?;
        Ok(bank)
    }

    /// Decode `filename` from the texture directory and upload it.
    pub fn create_texture(&mut self, uploader: &Uploader, filename: &str) -> Result<TextureId> {
        check_capacity(self.entries.len())?;
        let pixels = load_pixels(&self.dir, filename)?;
        let id = self.insert(uploader, &pixels)?;
        info!(
            "texture {} loaded as {:?} ({}x{})",
            filename, id, pixels.width, pixels.height
        );
        Ok(id)
    }

    fn insert(&mut self, uploader: &Uploader, pixels: &DecodedImage) -> Result<TextureId> {
        check_capacity(self.entries.len())?;
        let device = uploader.device();
        let image = uploader.upload_image(pixels)?;
        let view = image.create_view(vk::ImageAspectFlags::COLOR)?;
        let set = allocate_sets(device, self.pool.raw(), self.layout.raw(), 1)?[0];

        let image_info = vk::DescriptorImageInfo {
            sampler: self.sampler.raw(),
            image_view: view.raw(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            p_image_info: &image_info,
            ..Default::default()
        };
        unsafe { device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };

        self.entries.push(TextureEntry {
            _view: view,
            _image: image,
            set,
        });
        Ok(TextureId((self.entries.len() - 1) as u32))
    }

    pub fn contains(&self, id: TextureId) -> bool {
        id.index() < self.entries.len()
    }

    pub fn set(&self, id: TextureId) -> Result<vk::DescriptorSet, VkError> {
        self.entries
            .get(id.index())
            .map(|e| e.set)
            .ok_or(VkError::UnknownTexture(id))
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.raw()
    }
}

pub fn check_capacity(len: usize) -> Result<(), VkError> {
    if len >= MAX_TEXTURES {
        return Err(VkError::TextureBankFull { max: MAX_TEXTURES });
    }
    Ok(())
}

/// CPU side only. Called before anything is allocated on the device.
pub fn load_pixels(dir: &Path, filename: &str) -> Result<DecodedImage, AssetError> {
    decode_rgba(&dir.join(filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln-texture-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_file_fails_before_upload() {
        let dir = scratch("missing");
        let err = load_pixels(&dir, "nope.png").unwrap_err();
        assert!(matches!(err, AssetError::Io { .. } | AssetError::Decode { .. }));
    }

    #[test]
    fn corrupt_file_is_decode_error() {
        let dir = scratch("corrupt");
        std::fs::write(dir.join("broken.png"), b"\x89PNG\r\n\x1a\nnot really").unwrap();
        let err = load_pixels(&dir, "broken.png").unwrap_err();
        assert!(matches!(err, AssetError::Decode { .. }));
    }

    #[test]
    fn bank_capacity_includes_default_slot() {
        assert!(check_capacity(0).is_ok());
        assert!(check_capacity(MAX_TEXTURES - 1).is_ok());
        let err = check_capacity(MAX_TEXTURES).unwrap_err();
        assert!(matches!(err, VkError::TextureBankFull { max: MAX_TEXTURES }));
    }
}
