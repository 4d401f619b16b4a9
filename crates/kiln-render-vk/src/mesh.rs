// SPDX-License-Identifier: CEPL-1.0
use crate::memory::{BufferHandle, GpuBuffer};
use crate::upload::Uploader;
use anyhow::Result;
use ash::vk;
use kiln_math::Mat4;
use kiln_render::{RawMesh, TextureId};

/// One drawable: vertex buffer, optional index buffer, transform, texture.
///
/// Buffers are released exactly once, by [`Mesh::destroy_buffers`] or on drop.
/// After release the handles read as null and the counts as zero.
pub struct Mesh<B: BufferHandle = GpuBuffer> {
    vertex_buffer: Option<B>,
    vertex_count: u32,
    index_buffer: Option<B>,
    index_count: u32,
    model: Mat4,
    texture: TextureId,
}

impl<B: BufferHandle> Mesh<B> {
    pub fn from_parts(
        vertex_buffer: Option<B>,
        vertex_count: u32,
        index_buffer: Option<B>,
        index_count: u32,
        texture: TextureId,
    ) -> Self {
        Self {
            vertex_count: if vertex_buffer.is_some() { vertex_count } else { 0 },
            vertex_buffer,
            index_count: if index_buffer.is_some() { index_count } else { 0 },
            index_buffer,
            model: Mat4::IDENTITY,
            texture,
        }
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer
            .as_ref()
            .map_or(vk::Buffer::null(), B::raw)
    }

    pub fn index_buffer(&self) -> Option<vk::Buffer> {
        self.index_buffer.as_ref().map(B::raw)
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn is_drawable(&self) -> bool {
        self.vertex_buffer.is_some() && self.vertex_count > 0
    }

    pub fn model(&self) -> Mat4 {
        self.model
    }

    pub fn set_model(&mut self, model: Mat4) {
        self.model = model;
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    /// Release both buffers. A second call is a no-op.
    pub fn destroy_buffers(&mut self) {
        drop(self.index_buffer.take());
        drop(self.vertex_buffer.take());
        self.index_count = 0;
        self.vertex_count = 0;
    }
}

impl Mesh<GpuBuffer> {
    /// Stage `raw` into device-local vertex (and index) buffers.
    pub fn upload(uploader: &Uploader, raw: &RawMesh, texture: TextureId) -> Result<Self> {
        let vertex_buffer = uploader.upload_buffer(vk::BufferUsageFlags::VERTEX_BUFFER, &raw.vertices)?;
        let index_buffer = uploader.upload_buffer(vk::BufferUsageFlags::INDEX_BUFFER, &raw.indices)?;
        Ok(Self::from_parts(
            vertex_buffer,
            raw.vertices.len() as u32,
            index_buffer,
            raw.indices.len() as u32,
            texture,
        ))
    }
}

/// Meshes imported together, sharing one base transform.
pub struct MeshModel<B: BufferHandle = GpuBuffer> {
    meshes: Vec<Mesh<B>>,
    base: Mat4,
}

impl<B: BufferHandle> MeshModel<B> {
    pub fn new(meshes: Vec<Mesh<B>>) -> Self {
        Self {
            meshes,
            base: Mat4::IDENTITY,
        }
    }

    pub fn meshes(&self) -> &[Mesh<B>] {
        &self.meshes
    }

    pub fn meshes_mut(&mut self) -> &mut [Mesh<B>] {
        &mut self.meshes
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn base(&self) -> Mat4 {
        self.base
    }

    pub fn set_base(&mut self, base: Mat4) {
        self.base = base;
    }

    /// Transform a mesh is drawn with: base first, then the mesh's own.
    pub fn mesh_transform(&self, index: usize) -> Option<Mat4> {
        self.meshes.get(index).map(|m| self.base * m.model())
    }

    /// Release every mesh's buffers and forget them.
    pub fn destroy(&mut self) {
        for mesh in &mut self.meshes {
            mesh.destroy_buffers();
        }
        self.meshes.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Counts releases instead of talking to a device.
    pub(crate) struct FakeBuffer {
        id: u64,
        released: Rc<Cell<u32>>,
    }

    impl FakeBuffer {
        pub(crate) fn new(id: u64, released: &Rc<Cell<u32>>) -> Self {
            Self {
                id,
                released: Rc::clone(released),
            }
        }
    }

    impl BufferHandle for FakeBuffer {
        fn raw(&self) -> vk::Buffer {
            vk::Buffer::from_raw(self.id)
        }
    }

    impl Drop for FakeBuffer {
        fn drop(&mut self) {
            self.released.set(self.released.get() + 1);
        }
    }

    pub(crate) fn fake_mesh(released: &Rc<Cell<u32>>, indexed: bool) -> Mesh<FakeBuffer> {
        Mesh::from_parts(
            Some(FakeBuffer::new(1, released)),
            4,
            indexed.then(|| FakeBuffer::new(2, released)),
            6,
            TextureId::DEFAULT,
        )
    }

    #[test]
    fn destroy_twice_releases_once() {
        let released = Rc::new(Cell::new(0));
        let mut mesh = fake_mesh(&released, true);
        assert_eq!(mesh.vertex_buffer(), vk::Buffer::from_raw(1));
        assert_eq!(mesh.index_buffer(), Some(vk::Buffer::from_raw(2)));

        mesh.destroy_buffers();
        assert_eq!(released.get(), 2);
        assert_eq!(mesh.vertex_buffer(), vk::Buffer::null());
        assert_eq!(mesh.index_buffer(), None);
        assert_eq!((mesh.vertex_count(), mesh.index_count()), (0, 0));
        assert!(!mesh.is_drawable());

        mesh.destroy_buffers();
        assert_eq!(released.get(), 2);

        drop(mesh);
        assert_eq!(released.get(), 2);
    }

    #[test]
    fn drop_releases_without_explicit_destroy() {
        let released = Rc::new(Cell::new(0));
        drop(fake_mesh(&released, false));
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn index_count_ignored_without_index_buffer() {
        let released = Rc::new(Cell::new(0));
        let mesh = fake_mesh(&released, false);
        assert_eq!(mesh.index_count(), 0);
        assert_eq!(mesh.index_buffer(), None);
        assert!(mesh.is_drawable());
    }

    #[test]
    fn model_destroy_cascades() {
        let released = Rc::new(Cell::new(0));
        let mut model = MeshModel::new(vec![fake_mesh(&released, true), fake_mesh(&released, false)]);
        assert_eq!(model.mesh_count(), 2);
        model.destroy();
        assert_eq!(released.get(), 3);
        assert_eq!(model.mesh_count(), 0);
        model.destroy();
        assert_eq!(released.get(), 3);
    }

    #[test]
    fn mesh_transform_applies_base_first() {
        let released = Rc::new(Cell::new(0));
        let mut model = MeshModel::new(vec![fake_mesh(&released, true)]);
        let base = Mat4::from_translation(kiln_math::Vec3::new(1.0, 0.0, 0.0));
        let local = Mat4::from_scale(kiln_math::Vec3::splat(2.0));
        model.set_base(base);
        model.meshes_mut()[0].set_model(local);
        assert_eq!(model.mesh_transform(0), Some(base * local));
        assert_eq!(model.mesh_transform(1), None);
    }
}
