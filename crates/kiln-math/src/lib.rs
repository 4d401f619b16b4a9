// SPDX-License-Identifier: CEPL-1.0
pub use glam::{Mat4, Quat, Vec3};

use bytemuck::{Pod, Zeroable};
use serde::Deserialize;

/// Size in bytes of one model matrix as seen by shaders.
pub const MAT4_SIZE: u64 = std::mem::size_of::<Mat4>() as u64;

/// Smallest multiple of `alignment` that is >= `size`.
/// `alignment` must be a power of two; 0 is treated as "no requirement".
#[inline]
pub fn align_up(size: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return size;
    }
    debug_assert!(alignment.is_power_of_two(), "alignment {alignment} is not a power of two");
    (size + alignment - 1) & !(alignment - 1)
}

/// Per-frame camera block, binding 0 of the uniform set.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ViewProjection {
    pub projection: Mat4,
    pub view: Mat4,
}

impl Default for ViewProjection {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
        }
    }
}

/// Fixed look-at camera. Angles in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Camera {
    pub eye: [f32; 3],
    pub target: [f32; 3],
    pub up: [f32; 3],
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Camera {
            eye: [3.0, 1.0, 2.0],
            target: [0.0, 0.0, 0.0],
            up: [0.0, 1.0, 0.0],
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    /// Right-handed view + perspective with Y flipped for Vulkan clip space.
    pub fn view_projection(&self, aspect: f32) -> ViewProjection {
        let view = Mat4::look_at_rh(
            Vec3::from(self.eye),
            Vec3::from(self.target),
            Vec3::from(self.up),
        );
        let mut projection =
            Mat4::perspective_rh(self.fov_y_degrees.to_radians(), aspect, self.near, self.far);
        // Vulkan's clip-space Y points down
        projection.y_axis.y *= -1.0;
        ViewProjection { projection, view }
    }

    /// Same camera with its eye swung `degrees` around `target` about `up`.
    pub fn orbited(&self, degrees: f32) -> Camera {
        let target = Vec3::from(self.target);
        let axis = Vec3::from(self.up).normalize_or_zero();
        if axis == Vec3::ZERO {
            return *self;
        }
        let offset = Vec3::from(self.eye) - target;
        let eye = target + Quat::from_axis_angle(axis, degrees.to_radians()) * offset;
        Camera {
            eye: eye.to_array(),
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_is_smallest_multiple() {
        for shift in 0..9 {
            let a = 1u64 << shift;
            for s in 1..600u64 {
                let r = align_up(s, a);
                assert_eq!(r % a, 0);
                assert!(r >= s);
                assert!(r - s < a, "size={s} align={a} got={r}");
            }
        }
    }

    #[test]
    fn align_up_matrix_stride() {
        assert_eq!(align_up(MAT4_SIZE, 16), 64);
        assert_eq!(align_up(MAT4_SIZE, 64), 64);
        assert_eq!(align_up(MAT4_SIZE, 256), 256);
        assert_eq!(align_up(MAT4_SIZE, 0), 64);
    }

    #[test]
    fn projection_is_y_flipped() {
        let cam = Camera::default();
        let vp = cam.view_projection(4.0 / 3.0);
        let unflipped = Mat4::perspective_rh(45f32.to_radians(), 4.0 / 3.0, 0.1, 100.0);
        assert_eq!(vp.projection.y_axis.y, -unflipped.y_axis.y);
        assert_eq!(vp.projection.x_axis, unflipped.x_axis);
    }

    #[test]
    fn view_projection_is_two_matrices() {
        assert_eq!(std::mem::size_of::<ViewProjection>() as u64, 2 * MAT4_SIZE);
        let binding = ViewProjection::default();
        let bytes = bytemuck::bytes_of(&binding);
        assert_eq!(bytes.len(), 128);
    }

    #[test]
    fn orbit_keeps_distance_and_height() {
        let cam = Camera::default();
        let target = Vec3::from(cam.target);
        let radius = (Vec3::from(cam.eye) - target).length();
        for deg in [0.0, 45.0, 90.0, 200.0] {
            let moved = cam.orbited(deg);
            let eye = Vec3::from(moved.eye);
            assert!(((eye - target).length() - radius).abs() < 1e-4);
            assert!((eye.y - cam.eye[1]).abs() < 1e-5);
            assert_eq!(moved.target, cam.target);
        }
        assert_eq!(cam.orbited(0.0), cam);
        let full = Vec3::from(cam.orbited(360.0).eye);
        assert!(full.abs_diff_eq(Vec3::from(cam.eye), 1e-4));
        assert_ne!(cam.orbited(90.0).view_projection(1.0), cam.view_projection(1.0));
    }

    #[test]
    fn camera_partial_toml() {
        let cam: Camera = toml::from_str("eye = [0.0, 0.0, 5.0]\nfov_y_degrees = 60.0").unwrap();
        assert_eq!(cam.eye, [0.0, 0.0, 5.0]);
        assert_eq!(cam.fov_y_degrees, 60.0);
        assert_eq!(cam.far, 100.0);
    }
}
