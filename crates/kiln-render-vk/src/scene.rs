// SPDX-License-Identifier: CEPL-1.0
use crate::memory::{BufferHandle, GpuBuffer};
use crate::mesh::{Mesh, MeshModel};
use crate::VkError;
use kiln_math::Mat4;
use kiln_render::ModelId;

/// Everything the geometry subpass draws, in draw order.
pub struct Scene<B: BufferHandle = GpuBuffer> {
    models: Vec<MeshModel<B>>,
}

/// One mesh as recorded: `slot` is its position across all models and
/// doubles as the dynamic-uniform slot index.
pub struct DrawItem<'a, B: BufferHandle> {
    pub slot: usize,
    pub mesh: &'a Mesh<B>,
    pub transform: Mat4,
}

impl<B: BufferHandle> Default for Scene<B> {
    fn default() -> Self {
        Self { models: Vec::new() }
    }
}

impl<B: BufferHandle> Scene<B> {
    pub fn mesh_count(&self) -> usize {
        self.models.iter().map(MeshModel::mesh_count).sum()
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Fails when adding `additional` meshes would pass `max`.
    pub fn check_capacity(&self, additional: usize, max: Option<usize>) -> Result<(), VkError> {
        let requested = self.mesh_count() + additional;
        match max {
            Some(max) if requested > max => Err(VkError::TooManyObjects { requested, max }),
            _ => Ok(()),
        }
    }

    pub fn add(&mut self, model: MeshModel<B>, max: Option<usize>) -> Result<ModelId, VkError> {
        self.check_capacity(model.mesh_count(), max)?;
        self.models.push(model);
        Ok(ModelId(self.models.len() - 1))
    }

    /// Returns false for an unknown id.
    pub fn update_model(&mut self, id: ModelId, transform: Mat4) -> bool {
        match self.models.get_mut(id.0) {
            Some(model) => {
                model.set_base(transform);
                true
            }
            None => false,
        }
    }

    pub fn draw_items(&self) -> impl Iterator<Item = DrawItem<'_, B>> + '_ {
        self.models
            .iter()
            .flat_map(|model| {
                model
                    .meshes()
                    .iter()
                    .map(move |mesh| (mesh, model.base() * mesh.model()))
            })
            .enumerate()
            .map(|(slot, (mesh, transform))| DrawItem {
                slot,
                mesh,
                transform,
            })
    }

    pub fn destroy(&mut self) {
        for model in &mut self.models {
            model.destroy();
        }
        self.models.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::{fake_mesh, FakeBuffer};
    use kiln_math::Vec3;
    use std::cell::Cell;
    use std::rc::Rc;

    fn two_quads(released: &Rc<Cell<u32>>) -> Scene<FakeBuffer> {
        let mut scene = Scene::default();
        scene
            .add(MeshModel::new(vec![fake_mesh(released, true)]), None)
            .unwrap();
        scene
            .add(MeshModel::new(vec![fake_mesh(released, true)]), None)
            .unwrap();
        scene
    }

    #[test]
    fn slots_run_across_models() {
        let released = Rc::new(Cell::new(0));
        let mut scene = Scene::default();
        scene
            .add(
                MeshModel::new(vec![fake_mesh(&released, true), fake_mesh(&released, false)]),
                None,
            )
            .unwrap();
        scene
            .add(MeshModel::new(vec![fake_mesh(&released, true)]), None)
            .unwrap();
        let slots: Vec<usize> = scene.draw_items().map(|d| d.slot).collect();
        assert_eq!(slots, vec![0, 1, 2]);
        assert_eq!(scene.mesh_count(), 3);
    }

    #[test]
    fn latest_update_wins() {
        let released = Rc::new(Cell::new(0));
        let mut scene = two_quads(&released);
        let mut last = [Mat4::IDENTITY; 2];
        for n in 0..10 {
            for (i, id) in [ModelId(0), ModelId(1)].into_iter().enumerate() {
                let m = Mat4::from_rotation_z(n as f32 * 0.1 + i as f32)
                    * Mat4::from_translation(Vec3::new(i as f32, 0.0, -2.5));
                assert!(scene.update_model(id, m));
                last[i] = m;
            }
        }
        let transforms: Vec<Mat4> = scene.draw_items().map(|d| d.transform).collect();
        assert_eq!(transforms, last.to_vec());
    }

    #[test]
    fn unknown_model_is_ignored() {
        let released = Rc::new(Cell::new(0));
        let mut scene = two_quads(&released);
        assert!(!scene.update_model(ModelId(7), Mat4::ZERO));
        assert!(scene.draw_items().all(|d| d.transform == Mat4::IDENTITY));
    }

    #[test]
    fn capacity_is_enforced_before_insert() {
        let released = Rc::new(Cell::new(0));
        let mut scene = two_quads(&released);
        let err = scene
            .add(MeshModel::new(vec![fake_mesh(&released, true)]), Some(2))
            .unwrap_err();
        assert!(matches!(err, VkError::TooManyObjects { requested: 3, max: 2 }));
        assert_eq!(scene.model_count(), 2);
        assert!(scene.check_capacity(100, None).is_ok());
    }

    #[test]
    fn destroy_releases_everything() {
        let released = Rc::new(Cell::new(0));
        let mut scene = two_quads(&released);
        scene.destroy();
        assert_eq!(released.get(), 4);
        assert_eq!(scene.mesh_count(), 0);
    }
}
