use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Bits stored in `GlobalUniform::light_counts.w`.
pub const FRAME_FLAG_SSAO: u32 = 1 << 0;
pub const FRAME_FLAG_SKY_TEXTURE: u32 = 1 << 1;
pub const FRAME_FLAG_POINT_SHADOW: u32 = 1 << 2;

/// Per-frame block shared by every pass (group 0, binding 0).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct GlobalUniform {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub inverse_proj: [[f32; 4]; 4],
    pub inverse_view_proj: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    /// Direction the sunlight travels, normalized.
    pub sun_direction: [f32; 4],
    /// rgb colour, w intensity.
    pub sun_color: [f32; 4],
    pub ambient: [f32; 4],
    pub sky_zenith: [f32; 4],
    pub sky_horizon: [f32; 4],
    /// xyz grid dimensions, w max lights per cluster.
    pub cluster_dims: [u32; 4],
    /// width, height, near, far.
    pub screen_near_far: [f32; 4],
    /// x point light count, y shadow caster light index, z unused, w frame flags.
    pub light_counts: [u32; 4],
}

impl GlobalUniform {
    pub fn set_camera(&mut self, view: Mat4, proj: Mat4, eye: Vec3) {
        let view_proj = proj * view;
        self.view = view.to_cols_array_2d();
        self.proj = proj.to_cols_array_2d();
        self.view_proj = view_proj.to_cols_array_2d();
        self.inverse_proj = proj.inverse().to_cols_array_2d();
        self.inverse_view_proj = view_proj.inverse().to_cols_array_2d();
        self.camera_position = eye.extend(1.0).to_array();
    }
}

impl Default for GlobalUniform {
    fn default() -> Self {
        let mut uniform = Self::zeroed();
        uniform.set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO);
        uniform.sun_direction = [0.0, -1.0, 0.0, 0.0];
        uniform.light_counts[1] = u32::MAX;
        uniform
    }
}

/// Per-instance data read through `instance_index` (group 0, binding 1).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct ObjectData {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
    /// rgb albedo, w opacity.
    pub albedo: [f32; 4],
    /// rgb emissive colour premultiplied by intensity.
    pub emissive: [f32; 4],
    /// x roughness, y metallic.
    pub params: [f32; 4],
}

impl ObjectData {
    pub fn new(model: Mat4, albedo: Vec4, emissive: Vec3, roughness: f32, metallic: f32) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            normal: model.inverse().transpose().to_cols_array_2d(),
            albedo: albedo.to_array(),
            emissive: emissive.extend(0.0).to_array(),
            params: [roughness, metallic, 0.0, 0.0],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct PointLightRaw {
    pub position_radius: [f32; 4],
    pub color_intensity: [f32; 4],
}

impl PointLightRaw {
    pub fn new(position: Vec3, radius: f32, color: Vec3, intensity: f32) -> Self {
        Self {
            position_radius: position.extend(radius).to_array(),
            color_intensity: color.extend(intensity).to_array(),
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec4::from(self.position_radius).truncate()
    }

    pub fn radius(&self) -> f32 {
        self.position_radius[3]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_uniform_layout_matches_wgsl() {
        // 5 mat4 + 6 vec4<f32> + vec4<u32> + vec4<f32> + vec4<u32>
        assert_eq!(std::mem::size_of::<GlobalUniform>(), 5 * 64 + 9 * 16);
        assert_eq!(std::mem::size_of::<GlobalUniform>() % 16, 0);
    }

    #[test]
    fn storage_structs_are_16_byte_strided() {
        assert_eq!(std::mem::size_of::<ObjectData>(), 176);
        assert_eq!(std::mem::size_of::<PointLightRaw>(), 32);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let model = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let data = ObjectData::new(model, Vec4::ONE, Vec3::ZERO, 0.5, 0.0);
        let normal = Mat4::from_cols_array_2d(&data.normal);
        let n = normal.transform_vector3(Vec3::X);
        assert!((n.x - 0.5).abs() < 1e-6);
    }
}
