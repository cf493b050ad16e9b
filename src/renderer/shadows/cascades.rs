//! Directional shadow cascades.
//!
//! Each cascade covers one depth range of the camera frustum. The range's
//! eight corners are bounded by a sphere, and an orthographic projection
//! around that sphere is aligned to the light. The sphere centre is snapped to
//! whole shadow-map texels in light space, so camera motion moves the
//! projection in texel steps and edges do not shimmer.

use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

use crate::scene::Camera;

pub const CASCADE_COUNT: usize = 3;

/// Extra depth in front of each cascade so occluders between the light and
/// the cascade sphere still cast into it.
const CASTER_MARGIN: f32 = 50.0;

/// Radius is rounded up to this granularity to keep it stable while the
/// camera rotates.
const RADIUS_STEP: f32 = 16.0;

/// Far edge of each cascade in view-space distance: `[split0, split1, far]`.
pub fn cascade_far_edges(splits: [f32; 2], far: f32) -> [f32; CASCADE_COUNT] {
    [splits[0].min(far), splits[1].min(far), far]
}

/// `(near, far)` view-space range of each cascade.
pub fn cascade_ranges(near: f32, far: f32, splits: [f32; 2]) -> [(f32, f32); CASCADE_COUNT] {
    let [a, b, c] = cascade_far_edges(splits, far);
    [(near, a), (a, b), (b, c)]
}

/// Ascending comparison against the far edges; the first edge greater than
/// the depth wins. A depth exactly on a split belongs to the farther cascade.
/// Mirrors `select_cascade` in the lighting shader.
pub fn select_cascade(view_depth: f32, far_edges: [f32; CASCADE_COUNT]) -> usize {
    far_edges
        .iter()
        .position(|&edge| view_depth < edge)
        .unwrap_or(CASCADE_COUNT - 1)
}

/// World-space corners of the part of the camera frustum between `near` and
/// `far`. Near plane first, counter-clockwise from bottom-left.
pub fn frustum_corners(camera: &Camera, near: f32, far: f32) -> [Vec3; 8] {
    let proj = Mat4::perspective_rh(camera.fov_y_radians, camera.aspect, near, far);
    let inverse = (proj * camera.view()).inverse();
    let mut corners = [Vec3::ZERO; 8];
    let mut i = 0;
    for z in [0.0, 1.0] {
        for (x, y) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let world = inverse * Vec4::new(x, y, z, 1.0);
            corners[i] = world.xyz() / world.w;
            i += 1;
        }
    }
    corners
}

/// Rotation-only light view. Translation is applied by the projection so
/// snapping happens in a frame that does not move with the camera.
pub fn light_view(direction: Vec3) -> Mat4 {
    let direction = direction.try_normalize().unwrap_or(Vec3::NEG_Y);
    let up = if direction.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    Mat4::look_at_rh(-direction, Vec3::ZERO, up)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cascade {
    pub view_proj: Mat4,
    /// Sphere centre in light space after texel snapping.
    pub center: Vec3,
    pub radius: f32,
    /// World units covered by one shadow-map texel.
    pub texel: f32,
}

impl Cascade {
    pub fn compute(
        camera: &Camera,
        near: f32,
        far: f32,
        light_direction: Vec3,
        resolution: u32,
    ) -> Self {
        let corners = frustum_corners(camera, near, far);
        let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
        let radius = corners
            .iter()
            .map(|corner| corner.distance(center))
            .fold(0.0f32, f32::max);
        let radius = (radius * RADIUS_STEP).ceil() / RADIUS_STEP;

        let texel = 2.0 * radius / resolution.max(1) as f32;
        let view = light_view(light_direction);
        let mut center = view.transform_point3(center);
        center.x = (center.x / texel).round() * texel;
        center.y = (center.y / texel).round() * texel;

        let proj = Mat4::orthographic_rh(
            center.x - radius,
            center.x + radius,
            center.y - radius,
            center.y + radius,
            -(center.z + radius) - CASTER_MARGIN,
            -(center.z - radius),
        );

        Self {
            view_proj: proj * view,
            center,
            radius,
            texel,
        }
    }
}

pub fn compute_cascades(
    camera: &Camera,
    splits: [f32; 2],
    light_direction: Vec3,
    resolution: u32,
) -> [Cascade; CASCADE_COUNT] {
    cascade_ranges(camera.near, camera.far, splits)
        .map(|(near, far)| Cascade::compute(camera, near, far, light_direction, resolution))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_tile_the_frustum() {
        let ranges = cascade_ranges(0.1, 100.0, [10.0, 30.0]);
        assert_eq!(ranges, [(0.1, 10.0), (10.0, 30.0), (30.0, 100.0)]);
    }

    #[test]
    fn splits_past_far_are_clamped() {
        assert_eq!(cascade_far_edges([10.0, 300.0], 100.0), [10.0, 100.0, 100.0]);
    }

    #[test]
    fn sub_texel_camera_motion_keeps_projection() {
        let sun = Vec3::new(-0.4, -1.0, -0.3);
        let camera = Camera::default();
        let (near, far) = (camera.near, 10.0);
        let cascade = Cascade::compute(&camera, near, far, sun, 2048);

        // Move the camera halfway from the raw sphere centre towards the
        // snapped one, in the light's image plane.
        let view = light_view(sun);
        let corners = frustum_corners(&camera, near, far);
        let raw = view.transform_point3(corners.iter().copied().sum::<Vec3>() / 8.0);
        let toward = Vec3::new(cascade.center.x - raw.x, cascade.center.y - raw.y, 0.0) * 0.5;
        assert!(toward.x.abs() <= cascade.texel * 0.25 + 1e-5);
        assert!(toward.y.abs() <= cascade.texel * 0.25 + 1e-5);
        let shift = view.inverse().transform_vector3(toward);

        let mut moved = camera;
        moved.eye += shift;
        moved.target += shift;
        let after = Cascade::compute(&moved, near, far, sun, 2048);
        assert_eq!(after.radius, cascade.radius);
        assert_eq!(after.center.x, cascade.center.x);
        assert_eq!(after.center.y, cascade.center.y);
        assert!(after.view_proj.abs_diff_eq(cascade.view_proj, 1e-4));
    }

    #[test]
    fn snapped_centre_stays_within_half_a_texel() {
        let sun = Vec3::new(0.3, -1.0, 0.5);
        let mut camera = Camera::default();
        for step in 0..8 {
            camera.eye.x += 0.173 * step as f32;
            camera.target.x += 0.173 * step as f32;
            let view = light_view(sun);
            let corners = frustum_corners(&camera, 10.0, 30.0);
            let raw = view.transform_point3(corners.iter().copied().sum::<Vec3>() / 8.0);
            let cascade = Cascade::compute(&camera, 10.0, 30.0, sun, 1024);
            assert!((cascade.center.x - raw.x).abs() <= cascade.texel * 0.5 + 1e-4);
            assert!((cascade.center.y - raw.y).abs() <= cascade.texel * 0.5 + 1e-4);
        }
    }

    #[test]
    fn vertical_light_uses_alternate_up() {
        let view = light_view(Vec3::NEG_Y);
        assert!(view.is_finite());
        let forward = view.transform_vector3(Vec3::NEG_Y);
        assert!((forward - Vec3::NEG_Z).length() < 1e-5);
    }
}
