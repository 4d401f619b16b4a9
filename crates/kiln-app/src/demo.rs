// SPDX-License-Identifier: CEPL-1.0
//! The two spinning quads shown when nothing else is loaded.

use kiln_math::{Camera, Mat4, Vec3, ViewProjection};
use kiln_render::{RawMesh, Vertex};

const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

/// Axis-aligned quad in the XY plane, counter-clockwise from the top left.
pub fn quad(half_width: f32, half_height: f32) -> RawMesh {
    let (w, h) = (half_width, half_height);
    let vertices = vec![
        Vertex::new([-w, h, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0]),
        Vertex::new([-w, -h, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0]),
        Vertex::new([w, -h, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
        Vertex::new([w, h, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0]),
    ];
    RawMesh::new(vertices, QUAD_INDICES.to_vec())
}

pub fn quads() -> [RawMesh; 2] {
    [quad(0.4, 0.4), quad(0.25, 0.6)]
}

/// Transforms for both quads `seconds` into the run.
pub fn spin(seconds: f32) -> [Mat4; 2] {
    let angle = (seconds * 100.0).to_radians();
    [
        Mat4::from_translation(Vec3::new(0.0, 0.0, -2.5)) * Mat4::from_rotation_z(angle),
        Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0)) * Mat4::from_rotation_z(-angle * 10.0),
    ]
}

/// `camera` swung `rate` degrees per second, `seconds` into the run.
pub fn orbit_view(camera: &Camera, aspect: f32, rate: f32, seconds: f32) -> ViewProjection {
    camera.orbited(rate * seconds).view_projection(aspect)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quads_are_indexed_triangles() {
        for q in quads() {
            assert_eq!(q.vertices.len(), 4);
            assert_eq!(q.indices, QUAD_INDICES);
            assert!(q.indices.iter().all(|&i| (i as usize) < q.vertices.len()));
            assert!(q.material.is_none());
        }
    }

    #[test]
    fn orbit_moves_the_camera() {
        let cam = Camera::default();
        let aspect = 4.0 / 3.0;
        assert_eq!(orbit_view(&cam, aspect, 30.0, 0.0), cam.view_projection(aspect));
        let later = orbit_view(&cam, aspect, 30.0, 1.0);
        assert_eq!(later, cam.orbited(30.0).view_projection(aspect));
        assert_ne!(later.view, cam.view_projection(aspect).view);
        assert_eq!(later.projection, cam.view_projection(aspect).projection);
    }

    #[test]
    fn spin_starts_at_rest() {
        let [a, b] = spin(0.0);
        assert_eq!(a, Mat4::from_translation(Vec3::new(0.0, 0.0, -2.5)));
        assert_eq!(b, Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0)));
        let [a1, b1] = spin(1.0);
        assert_ne!(a1, a);
        assert_ne!(b1, b);
    }
}
