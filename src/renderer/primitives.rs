use super::vertex::{v, Vertex};
use std::f32::consts::PI;

pub fn sphere_mesh(segments: u32, rings: u32) -> (Vec<Vertex>, Vec<u32>) {
    let segments = segments.max(3);
    let rings = rings.max(2);
    let mut vertices = Vec::with_capacity(((segments + 1) * (rings + 1)) as usize);
    let mut indices = Vec::with_capacity((segments * rings * 6) as usize);

    for ring in 0..=rings {
        let phi = PI * ring as f32 / rings as f32;
        let (ring_radius, y) = phi.sin_cos();

        for segment in 0..=segments {
            let theta = 2.0 * PI * segment as f32 / segments as f32;
            let (sin_t, cos_t) = theta.sin_cos();
            let p = [ring_radius * cos_t * 0.5, y * 0.5, ring_radius * sin_t * 0.5];
            let n = [ring_radius * cos_t, y, ring_radius * sin_t];
            let uv = [
                segment as f32 / segments as f32,
                ring as f32 / rings as f32,
            ];
            vertices.push(v(p, n, uv));
        }
    }

    let stride = segments + 1;
    for ring in 0..rings {
        for segment in 0..segments {
            let a = ring * stride + segment;
            let b = a + stride;
            indices.extend_from_slice(&[a, a + 1, b, a + 1, b + 1, b]);
        }
    }

    (vertices, indices)
}

/// Unit cube centred on the origin, four vertices per face.
pub fn cube_mesh() -> (Vec<Vertex>, Vec<u32>) {
    // (normal, u axis, v axis)
    const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, u_axis, v_axis) in FACES {
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let pos = [
                0.5 * (normal[0] + su * u_axis[0] + sv * v_axis[0]),
                0.5 * (normal[1] + su * u_axis[1] + sv * v_axis[1]),
                0.5 * (normal[2] + su * u_axis[2] + sv * v_axis[2]),
            ];
            let uv = [(su + 1.0) * 0.5, (1.0 - sv) * 0.5];
            vertices.push(v(pos, normal, uv));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    (vertices, indices)
}

/// Ground plane on y = 0 spanning `[-half, half]` in x and z.
pub fn plane_mesh(half: f32, uv_repeat: f32) -> (Vec<Vertex>, Vec<u32>) {
    let n = [0.0, 1.0, 0.0];
    let vertices = vec![
        v([-half, 0.0, half], n, [0.0, uv_repeat]),
        v([half, 0.0, half], n, [uv_repeat, uv_repeat]),
        v([half, 0.0, -half], n, [uv_repeat, 0.0]),
        v([-half, 0.0, -half], n, [0.0, 0.0]),
    ];
    (vertices, vec![0, 1, 2, 0, 2, 3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn assert_ccw_outward(vertices: &[Vertex], indices: &[u32]) {
        for tri in indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(vertices[i as usize].pos));
            let face_normal = (b - a).cross(c - a);
            if face_normal.length_squared() < 1e-10 {
                continue;
            }
            let n = Vec3::from(vertices[tri[0] as usize].normal);
            assert!(face_normal.dot(n) > 0.0, "triangle {:?} winds inward", tri);
        }
    }

    #[test]
    fn cube_counts_look_right() {
        let (v, i) = cube_mesh();
        assert_eq!(v.len(), 24);
        assert_eq!(i.len(), 36);
        assert_ccw_outward(&v, &i);
    }

    #[test]
    fn sphere_winds_outward() {
        let (v, i) = sphere_mesh(16, 8);
        assert_eq!(v.len(), 17 * 9);
        assert_eq!(i.len(), 16 * 8 * 6);
        assert_ccw_outward(&v, &i);
    }

    #[test]
    fn plane_faces_up() {
        let (v, i) = plane_mesh(10.0, 4.0);
        assert_ccw_outward(&v, &i);
    }
}
