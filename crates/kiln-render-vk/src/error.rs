// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use kiln_render::TextureId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VkError {
    #[error("no memory type matches bits {type_bits:#x} with {required:?}")]
    NoCompatibleMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("no supported depth attachment format")]
    NoSupportedDepthFormat,

    #[error("no suitable physical device/queue family")]
    NoSuitableDevice,

    #[error("{requested} meshes would exceed the dynamic uniform capacity of {max}")]
    TooManyObjects { requested: usize, max: usize },

    #[error("texture bank is full ({max} textures)")]
    TextureBankFull { max: usize },

    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureId),

    #[error("unsupported layout transition {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },

    #[error("buffer write of {len} bytes at {offset} overruns {size}-byte buffer")]
    BufferOverrun {
        offset: vk::DeviceSize,
        len: vk::DeviceSize,
        size: vk::DeviceSize,
    },
}
