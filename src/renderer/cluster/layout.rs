use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, UVec3, Vec2, Vec3, Vec4};

use crate::error::RenderError;
use crate::renderer::uniforms::PointLightRaw;

/// View-space bounds of one cluster, stored as `vec4` pairs on the GPU.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct ClusterAabb {
    pub min: [f32; 4],
    pub max: [f32; 4],
}

impl ClusterAabb {
    pub fn min(&self) -> Vec3 {
        Vec4::from(self.min).truncate()
    }

    pub fn max(&self) -> Vec3 {
        Vec4::from(self.max).truncate()
    }

    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        let closest = center.clamp(self.min(), self.max());
        closest.distance_squared(center) <= radius * radius
    }

    pub fn contains(&self, point: Vec3, epsilon: f32) -> bool {
        point.cmpge(self.min() - Vec3::splat(epsilon)).all()
            && point.cmple(self.max() + Vec3::splat(epsilon)).all()
    }
}

/// Screen tiles in x/y, logarithmic depth slices in z.
///
/// The lighting shaders derive a fragment's cluster with exactly the same
/// arithmetic (see `cluster_index` in `common.wgsl`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClusterLayout {
    pub dims: UVec3,
    pub max_lights: u32,
    pub screen: UVec2,
    pub near: f32,
    pub far: f32,
}

impl ClusterLayout {
    pub fn new(dims: [u32; 3], max_lights: u32, screen: [u32; 2], near: f32, far: f32) -> Self {
        Self {
            dims: UVec3::from(dims),
            max_lights,
            screen: UVec2::from(screen),
            near,
            far,
        }
    }

    /// Rejects degenerate grids. Tiles are rounded up, so every pixel maps to
    /// a cluster inside the grid; trailing tiles no pixel reaches stay empty.
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.dims.cmpeq(UVec3::ZERO).any() {
            return Err(RenderError::logic(format!(
                "cluster grid {}x{}x{} is degenerate",
                self.dims.x, self.dims.y, self.dims.z
            )));
        }
        if self.screen.cmpeq(UVec2::ZERO).any() {
            return Err(RenderError::logic(format!(
                "framebuffer {}x{} has a zero dimension",
                self.screen.x, self.screen.y
            )));
        }
        if !(self.near > 0.0 && self.far > self.near) {
            return Err(RenderError::logic(format!(
                "clip planes near {} / far {} are invalid",
                self.near, self.far
            )));
        }
        if self.max_lights == 0 {
            return Err(RenderError::logic("cluster light cap is zero"));
        }
        Ok(())
    }

    pub fn cluster_count(&self) -> u32 {
        self.dims.x * self.dims.y * self.dims.z
    }

    /// Pixel size of one screen tile, rounded up.
    pub fn tile_size(&self) -> UVec2 {
        (self.screen + self.dims.truncate() - UVec2::ONE) / self.dims.truncate()
    }

    pub fn slice_for_depth(&self, view_depth: f32) -> u32 {
        let scale = self.dims.z as f32 / (self.far / self.near).ln();
        let slice = ((view_depth / self.near).ln() * scale).floor().max(0.0) as u32;
        slice.min(self.dims.z - 1)
    }

    /// Positive view-space distances bounding `slice`.
    pub fn slice_bounds(&self, slice: u32) -> (f32, f32) {
        let ratio = self.far / self.near;
        let z = self.dims.z as f32;
        (
            self.near * ratio.powf(slice as f32 / z),
            self.near * ratio.powf((slice + 1) as f32 / z),
        )
    }

    pub fn tile_for_fragment(&self, frag_coord: Vec2) -> UVec2 {
        let tile = (frag_coord / self.tile_size().as_vec2()).floor().max(Vec2::ZERO);
        tile.as_uvec2().min(self.dims.truncate() - UVec2::ONE)
    }

    /// `frag_coord` is in pixels with the origin at the top-left corner.
    pub fn cluster_index(&self, frag_coord: Vec2, view_depth: f32) -> u32 {
        let tile = self.tile_for_fragment(frag_coord);
        let slice = self.slice_for_depth(view_depth);
        tile.x + tile.y * self.dims.x + slice * self.dims.x * self.dims.y
    }

    pub fn cluster_coords(&self, index: u32) -> UVec3 {
        let per_slice = self.dims.x * self.dims.y;
        UVec3::new(
            index % self.dims.x,
            (index % per_slice) / self.dims.x,
            index / per_slice,
        )
    }

    pub fn compute_aabb(&self, index: u32, inverse_proj: Mat4) -> ClusterAabb {
        let coords = self.cluster_coords(index);
        let tile = self.tile_size().as_vec2();
        let px_min = coords.truncate().as_vec2() * tile;
        let px_max = px_min + tile;

        let near_min = self.screen_to_view(px_min, inverse_proj);
        let near_max = self.screen_to_view(px_max, inverse_proj);

        let (slice_near, slice_far) = self.slice_bounds(coords.z);
        let points = [
            line_at_depth(near_min, slice_near),
            line_at_depth(near_min, slice_far),
            line_at_depth(near_max, slice_near),
            line_at_depth(near_max, slice_far),
        ];

        let min = points.iter().copied().fold(Vec3::splat(f32::MAX), Vec3::min);
        let max = points.iter().copied().fold(Vec3::splat(f32::MIN), Vec3::max);
        ClusterAabb {
            min: min.extend(0.0).to_array(),
            max: max.extend(0.0).to_array(),
        }
    }

    pub fn compute_aabbs(&self, inverse_proj: Mat4) -> Vec<ClusterAabb> {
        (0..self.cluster_count())
            .map(|index| self.compute_aabb(index, inverse_proj))
            .collect()
    }

    /// Point on the near plane under a pixel.
    fn screen_to_view(&self, pixel: Vec2, inverse_proj: Mat4) -> Vec3 {
        let uv = pixel / self.screen.as_vec2();
        let ndc = Vec4::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
        let view = inverse_proj * ndc;
        view.truncate() / view.w
    }

    /// Reference version of the cull pass.
    pub fn cull_lights(
        &self,
        aabbs: &[ClusterAabb],
        lights: &[PointLightRaw],
        view: Mat4,
    ) -> ClusterLights {
        let cap = self.max_lights as usize;
        let mut result = ClusterLights {
            counts: vec![0; aabbs.len()],
            indices: vec![0; aabbs.len() * cap],
            overflowed: 0,
        };

        let view_lights: Vec<(Vec3, f32)> = lights
            .iter()
            .map(|light| (view.transform_point3(light.position()), light.radius()))
            .collect();

        for (cluster, aabb) in aabbs.iter().enumerate() {
            let mut count = 0usize;
            let mut truncated = false;
            for (index, (center, radius)) in view_lights.iter().enumerate() {
                if !aabb.intersects_sphere(*center, *radius) {
                    continue;
                }
                if count == cap {
                    truncated = true;
                    continue;
                }
                result.indices[cluster * cap + count] = index as u32;
                count += 1;
            }
            result.counts[cluster] = count as u32;
            if truncated {
                result.overflowed += 1;
            }
        }
        result
    }
}

/// Per-cluster light lists: fixed-size slots of `max_lights` indices.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterLights {
    pub counts: Vec<u32>,
    pub indices: Vec<u32>,
    /// Clusters that hit the cap and dropped lights.
    pub overflowed: u32,
}

impl ClusterLights {
    pub fn lights_in(&self, cluster: u32, max_lights: u32) -> &[u32] {
        let start = (cluster * max_lights) as usize;
        &self.indices[start..start + self.counts[cluster as usize] as usize]
    }
}

fn line_at_depth(near_point: Vec3, depth: f32) -> Vec3 {
    near_point * (-depth / near_point.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ClusterLayout {
        ClusterLayout::new([16, 9, 24], 8, [1280, 720], 0.1, 100.0)
    }

    #[test]
    fn tile_size_rounds_up() {
        let l = ClusterLayout::new([16, 9, 24], 8, [1000, 700], 0.1, 100.0);
        assert_eq!(l.tile_size(), UVec2::new(63, 78));
        assert!(l.validate().is_ok());
    }

    #[test]
    fn degenerate_grids_are_rejected() {
        let l = ClusterLayout::new([16, 0, 24], 8, [1280, 720], 0.1, 100.0);
        assert!(matches!(l.validate(), Err(RenderError::CoreLogic(_))));
        let l = ClusterLayout::new([16, 9, 24], 8, [0, 720], 0.1, 100.0);
        assert!(matches!(l.validate(), Err(RenderError::CoreLogic(_))));
        let l = ClusterLayout::new([16, 9, 24], 0, [1280, 720], 0.1, 100.0);
        assert!(l.validate().is_err());
    }

    #[test]
    fn odd_window_sizes_keep_every_pixel_in_the_grid() {
        for screen in [[1280, 64], [225, 720], [240, 720], [1280, 28], [12, 720], [1, 1]] {
            let l = ClusterLayout::new([16, 9, 24], 8, screen, 0.1, 100.0);
            assert!(l.validate().is_ok(), "{screen:?} rejected");
            let last = Vec2::new(screen[0] as f32 - 0.5, screen[1] as f32 - 0.5);
            let index = l.cluster_index(last, l.far);
            assert!(index < l.cluster_count(), "{screen:?} -> {index}");
            let tile = l.tile_for_fragment(last);
            assert!(tile.x < 16 && tile.y < 9);
        }
    }

    #[test]
    fn slices_cover_near_to_far() {
        let l = layout();
        let (first, _) = l.slice_bounds(0);
        let (_, last) = l.slice_bounds(l.dims.z - 1);
        assert!((first - l.near).abs() < 1e-6);
        assert!((last - l.far).abs() < 1e-3);
        assert_eq!(l.slice_for_depth(0.01), 0);
        assert_eq!(l.slice_for_depth(1000.0), l.dims.z - 1);
    }

    #[test]
    fn coords_round_trip_index() {
        let l = layout();
        for index in [0, 15, 16, 143, 144, 3455] {
            let c = l.cluster_coords(index);
            assert_eq!(c.x + c.y * 16 + c.z * 144, index);
        }
    }
}
