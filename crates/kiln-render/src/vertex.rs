// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use std::mem::offset_of;

/// Interleaved vertex as consumed by the geometry pass (binding 0).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub col: [f32; 3],
    pub tex: [f32; 2],
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;
    pub const POS_OFFSET: u32 = offset_of!(Vertex, pos) as u32;
    pub const COL_OFFSET: u32 = offset_of!(Vertex, col) as u32;
    pub const TEX_OFFSET: u32 = offset_of!(Vertex, tex) as u32;

    pub const fn new(pos: [f32; 3], col: [f32; 3], tex: [f32; 2]) -> Self {
        Self { pos, col, tex }
    }
}

/// CPU-side submesh: triangle list plus an optional material index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawMesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub material: Option<usize>,
}

impl RawMesh {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices,
            material: None,
        }
    }

    pub fn with_material(mut self, material: usize) -> Self {
        self.material = Some(material);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_vertex_input() {
        assert_eq!(Vertex::STRIDE, 32);
        assert_eq!(Vertex::POS_OFFSET, 0);
        assert_eq!(Vertex::COL_OFFSET, 12);
        assert_eq!(Vertex::TEX_OFFSET, 24);
    }

    #[test]
    fn vertices_cast_to_bytes() {
        let v = [Vertex::new([1.0, 2.0, 3.0], [1.0, 1.0, 1.0], [0.5, 0.5]); 4];
        let bytes: &[u8] = bytemuck::cast_slice(&v);
        assert_eq!(bytes.len(), 4 * 32);
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
    }
}
