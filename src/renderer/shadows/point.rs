use glam::{Mat4, Vec3};

pub const FACE_COUNT: usize = 6;

/// Layer order of the point shadow map: +X, -X, +Y, -Y, +Z, -Z.
pub const FACE_DIRECTIONS: [Vec3; FACE_COUNT] = [
    Vec3::X,
    Vec3::NEG_X,
    Vec3::Y,
    Vec3::NEG_Y,
    Vec3::Z,
    Vec3::NEG_Z,
];

pub const FACE_UPS: [Vec3; FACE_COUNT] = [
    Vec3::Y,
    Vec3::Y,
    Vec3::Z,
    Vec3::NEG_Z,
    Vec3::Y,
    Vec3::Y,
];

/// One 90 degree perspective view per face, using the camera clip planes.
pub fn face_view_projs(position: Vec3, near: f32, far: f32) -> [Mat4; FACE_COUNT] {
    let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, near, far);
    std::array::from_fn(|face| {
        proj * Mat4::look_at_rh(position, position + FACE_DIRECTIONS[face], FACE_UPS[face])
    })
}

/// Face whose frustum contains `direction` (light to fragment). Same tie
/// breaking as `point_face` in the lighting shader.
pub fn select_face(direction: Vec3) -> usize {
    let a = direction.abs();
    if a.x >= a.y && a.x >= a.z {
        if direction.x >= 0.0 { 0 } else { 1 }
    } else if a.y >= a.z {
        if direction.y >= 0.0 { 2 } else { 3 }
    } else if direction.z >= 0.0 {
        4
    } else {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_directions_select_their_face() {
        for (face, direction) in FACE_DIRECTIONS.iter().enumerate() {
            assert_eq!(select_face(*direction * 3.0), face);
        }
    }

    #[test]
    fn ties_prefer_x_then_y() {
        assert_eq!(select_face(Vec3::new(1.0, 1.0, 1.0)), 0);
        assert_eq!(select_face(Vec3::new(0.0, -1.0, 1.0)), 3);
    }
}
