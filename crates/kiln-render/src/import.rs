// SPDX-License-Identifier: CEPL-1.0
//! Wavefront OBJ/MTL import into flat [`RawMesh`] lists.

use crate::{AssetError, RawMesh, Vertex};
use std::path::Path;
use tracing::{debug, warn};

const WHITE: [f32; 3] = [1.0, 1.0, 1.0];

/// Everything the renderer needs from a model file.
#[derive(Clone, Debug, Default)]
pub struct ImportedScene {
    /// Diffuse texture file name per material, directory stripped.
    pub materials: Vec<Option<String>>,
    pub meshes: Vec<RawMesh>,
}

pub fn import_scene(path: &Path) -> Result<ImportedScene, AssetError> {
    let opts = tobj::LoadOptions {
        single_index: true,
        triangulate: true,
        ..Default::default()
    };
    let (models, materials) = tobj::load_obj(path, &opts).map_err(|source| AssetError::Import {
        path: path.to_owned(),
        source,
    })?;

    // A broken or missing .mtl leaves every mesh untextured rather than failing the import
    let materials = match materials {
        Ok(m) => m,
        Err(e) => {
            warn!("{}: materials unavailable ({e}); using default texture", path.display());
            Vec::new()
        }
    };

    let scene = ImportedScene {
        materials: materials
            .iter()
            .map(|m| m.diffuse_texture.as_deref().and_then(texture_file_name))
            .collect(),
        meshes: models.iter().map(|m| raw_mesh(&m.mesh)).collect(),
    };
    debug!(
        "imported {}: {} meshes, {} materials",
        path.display(),
        scene.meshes.len(),
        scene.materials.len()
    );
    Ok(scene)
}

/// Last path component of a texture reference, accepting both separators.
pub fn texture_file_name(reference: &str) -> Option<String> {
    let name = reference.rsplit(['/', '\\']).next().unwrap_or(reference).trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_owned())
    }
}

fn raw_mesh(mesh: &tobj::Mesh) -> RawMesh {
    let count = mesh.positions.len() / 3;
    let vertices = (0..count)
        .map(|i| {
            let pos = [
                mesh.positions[3 * i],
                mesh.positions[3 * i + 1],
                mesh.positions[3 * i + 2],
            ];
            let col = match mesh.vertex_color.get(3 * i..3 * i + 3) {
                Some(c) => [c[0], c[1], c[2]],
                None => WHITE,
            };
            let tex = match mesh.texcoords.get(2 * i..2 * i + 2) {
                Some(t) => [t[0], t[1]],
                None => [0.0, 0.0],
            };
            Vertex::new(pos, col, tex)
        })
        .collect();

    RawMesh {
        vertices,
        indices: mesh.indices.clone(),
        material: mesh.material_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const OBJ: &str = "\
mtllib scene.mtl
o quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
usemtl brick
f 1/1 2/2 3/3 4/4
o tri
v 0 0 1
v 1 0 1
v 1 1 1
usemtl plain
f 5 6 7
";

    const MTL: &str = "\
newmtl brick
Kd 1 1 1
map_Kd textures\\brick.png

newmtl plain
Kd 0.5 0.5 0.5
";

    fn write_scene() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln-import-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("scene.mtl"), MTL).unwrap();
        let obj = dir.join("scene.obj");
        std::fs::write(&obj, OBJ).unwrap();
        obj
    }

    #[test]
    fn strips_either_separator() {
        assert_eq!(texture_file_name("brick.png").as_deref(), Some("brick.png"));
        assert_eq!(texture_file_name("C:\\art\\brick.png").as_deref(), Some("brick.png"));
        assert_eq!(texture_file_name("../art/brick.png").as_deref(), Some("brick.png"));
        assert_eq!(texture_file_name("art/"), None);
        assert_eq!(texture_file_name(""), None);
    }

    #[test]
    fn missing_attributes_get_defaults() {
        let mesh = tobj::Mesh {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            indices: vec![0, 1, 2],
            ..Default::default()
        };
        let raw = raw_mesh(&mesh);
        assert_eq!(raw.vertices.len(), 3);
        assert!(raw.vertices.iter().all(|v| v.tex == [0.0, 0.0]));
        assert!(raw.vertices.iter().all(|v| v.col == WHITE));
        assert_eq!(raw.material, None);
        assert_eq!(raw.vertices[1].pos, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn imports_obj_with_materials() {
        let scene = import_scene(&write_scene()).unwrap();

        assert_eq!(scene.materials.len(), 2);
        assert_eq!(scene.materials[0].as_deref(), Some("brick.png"));
        assert_eq!(scene.materials[1], None);

        let quad = scene
            .meshes
            .iter()
            .find(|m| m.indices.len() == 6)
            .expect("triangulated quad");
        assert_eq!(quad.vertices.len(), 4);
        assert_eq!(quad.material, Some(0));
        assert!(quad.vertices.iter().any(|v| v.tex == [1.0, 1.0]));

        let tri = scene
            .meshes
            .iter()
            .find(|m| m.indices.len() == 3)
            .expect("triangle");
        assert!(tri.vertices.iter().all(|v| v.tex == [0.0, 0.0]));
        assert_eq!(tri.material, Some(1));
    }

    #[test]
    fn missing_file_is_an_import_error() {
        let err = import_scene(Path::new("/nonexistent/kiln/model.obj")).unwrap_err();
        assert!(matches!(err, AssetError::Import { .. }));
    }
}
