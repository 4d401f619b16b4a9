// SPDX-License-Identifier: CEPL-1.0
use kiln_math::Camera;
use serde::Deserialize;
use std::path::PathBuf;

/// How per-object model matrices reach the vertex shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransformMode {
    /// 64-byte push constant per draw.
    #[default]
    PushConstant,
    /// One aligned slot per mesh in a per-image buffer, selected by dynamic offset.
    DynamicUniform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PassLayout {
    /// Geometry straight into the swapchain image.
    Forward,
    /// Geometry into offscreen colour + depth, then a fullscreen composition subpass.
    #[default]
    Deferred,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub clear_color: [f32; 4],
    pub transform_mode: TransformMode,
    pub pass_layout: PassLayout,
    /// Request VK_LAYER_KHRONOS_validation. Missing layer only warns.
    pub validation: bool,
    /// Load `*.spv` from here instead of the blobs built into the binary.
    pub shader_dir: Option<PathBuf>,
    pub texture_dir: PathBuf,
    pub camera: Camera,
}

impl Default for RendererConfig {
    fn default() -> Self {
        RendererConfig {
            clear_color: default_clear(),
            transform_mode: TransformMode::default(),
            pass_layout: PassLayout::default(),
            validation: cfg!(debug_assertions),
            shader_dir: None,
            texture_dir: PathBuf::from("Textures"),
            camera: Camera::default(),
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.6, 0.65, 0.4, 1.0]
}
