// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::Path;

pub mod config;
pub mod decode;
pub mod error;
pub mod import;
pub mod shader;
mod vertex;

pub use config::{PassLayout, RendererConfig, TransformMode};
pub use error::AssetError;
pub use kiln_math::{Mat4, ViewProjection};
pub use vertex::{RawMesh, Vertex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// Handle to a texture slot. Slot 0 always exists and samples opaque white,
/// so geometry without a material keeps its vertex colour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

impl TextureId {
    /// "No texture".
    pub const DEFAULT: TextureId = TextureId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModelId(pub usize);

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RendererConfig,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Draw one frame.
    fn draw(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);

    /// Camera block uploaded with every following frame.
    fn set_view_projection(&mut self, view_projection: ViewProjection);

    /// Decode `filename` (relative to the configured texture directory) and
    /// upload it. Decode failures are returned before any GPU allocation.
    fn create_texture(&mut self, filename: &str) -> Result<TextureId>;

    /// Upload `meshes` as one model. `RawMesh::material` indexes `textures`;
    /// a missing or out-of-range index binds [`TextureId::DEFAULT`].
    fn add_model(&mut self, meshes: &[RawMesh], textures: &[TextureId]) -> Result<ModelId>;

    /// Replace the base transform of a model. Unknown ids are ignored.
    fn update_model(&mut self, id: ModelId, transform: Mat4);

    fn model_count(&self) -> usize;

    /// Import a model file, create its textures and upload it.
    fn load_model(&mut self, path: &Path) -> Result<ModelId> {
        let scene = import::import_scene(path)?;
        let mut textures = Vec::with_capacity(scene.materials.len());
        for material in &scene.materials {
            let id = match material {
                Some(file) => self.create_texture(file)?,
                None => TextureId::DEFAULT,
            };
            textures.push(id);
        }
        self.add_model(&scene.meshes, &textures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Decodes textures for real and only counts what would be uploaded.
    struct Headless {
        texture_dir: PathBuf,
        textures: u32,
        models: Vec<usize>,
    }

    impl Headless {
        fn new_in(texture_dir: PathBuf) -> Self {
            Self {
                texture_dir,
                textures: 0,
                models: Vec::new(),
            }
        }
    }

    impl Renderer for Headless {
        fn new(
            _window: &dyn HasWindowHandle,
            _display: &dyn HasDisplayHandle,
            _size: RenderSize,
            _cfg: &RendererConfig,
        ) -> Result<Self> {
            anyhow::bail!("no device")
        }

        fn draw(&mut self) -> Result<()> {
            Ok(())
        }

        fn set_clear_color(&mut self, _rgba: [f32; 4]) {}

        fn set_view_projection(&mut self, _view_projection: ViewProjection) {}

        fn create_texture(&mut self, filename: &str) -> Result<TextureId> {
            decode::decode_rgba(&self.texture_dir.join(filename))?;
            self.textures += 1;
            Ok(TextureId(self.textures))
        }

        fn add_model(&mut self, meshes: &[RawMesh], _textures: &[TextureId]) -> Result<ModelId> {
            self.models.push(meshes.len());
            Ok(ModelId(self.models.len() - 1))
        }

        fn update_model(&mut self, _id: ModelId, _transform: Mat4) {}

        fn model_count(&self) -> usize {
            self.models.len()
        }
    }

    fn write_model(dir: &Path, texture: &str) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join("crate.mtl"),
            format!("newmtl wood\nKd 1 1 1\nmap_Kd {texture}\n"),
        )
        .unwrap();
        let obj = dir.join("crate.obj");
        std::fs::write(
            &obj,
            "mtllib crate.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl wood\nf 1 2 3\n",
        )
        .unwrap();
        obj
    }

    #[test]
    fn bad_texture_aborts_model_load() {
        let dir = std::env::temp_dir().join(format!("kiln-load-bad-{}", std::process::id()));
        let obj = write_model(&dir, "wood.png");
        std::fs::write(dir.join("wood.png"), b"definitely not a png").unwrap();

        let mut r = Headless::new_in(dir);
        let err = r.load_model(&obj).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AssetError>(),
            Some(AssetError::Decode { .. })
        ));
        assert_eq!(r.model_count(), 0);
        assert_eq!(r.textures, 0);
    }

    #[test]
    fn good_texture_loads_model() {
        let dir = std::env::temp_dir().join(format!("kiln-load-good-{}", std::process::id()));
        let obj = write_model(&dir, "wood.png");
        image::RgbaImage::from_pixel(2, 2, image::Rgba([200, 120, 40, 255]))
            .save(dir.join("wood.png"))
            .unwrap();

        let mut r = Headless::new_in(dir);
        let id = r.load_model(&obj).unwrap();
        assert_eq!(id, ModelId(0));
        assert_eq!(r.model_count(), 1);
        assert_eq!(r.textures, 1);
    }

    #[test]
    fn aspect_guards_zero_height() {
        let s = RenderSize { width: 800, height: 0 };
        assert_eq!(s.aspect(), 800.0);
        let s = RenderSize { width: 800, height: 600 };
        assert!((s.aspect() - 4.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn default_texture_is_slot_zero() {
        assert_eq!(TextureId::DEFAULT.index(), 0);
        assert_eq!(TextureId::default(), TextureId::DEFAULT);
    }
}
