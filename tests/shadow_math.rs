// CPU mirrors of the cascade and point-face math used by the shadow passes
// and the lighting shaders.
use clustered_deferred::renderer::shadows::cascades::{cascade_far_edges, frustum_corners};
use clustered_deferred::renderer::shadows::point::FACE_DIRECTIONS;
use clustered_deferred::renderer::shadows::{
    compute_cascades, face_view_projs, select_cascade, select_face, ShadowPhase, CASCADE_COUNT,
};
use clustered_deferred::scene::Camera;
use glam::{Vec3, Vec4Swizzles};

const SPLITS: [f32; 2] = [10.0, 30.0];
const RESOLUTION: u32 = 2048;

fn sun() -> Vec3 {
    Vec3::new(-0.4, -1.0, -0.3).normalize()
}

#[test]
fn cascade_selection_is_ascending_first_match() {
    let edges = cascade_far_edges(SPLITS, 100.0);
    let cases = [
        (0.1, 0),
        (9.999, 0),
        (10.0, 1),
        (10.001, 1),
        (29.999, 1),
        (30.0, 2),
        (100.0, 2),
    ];
    for (depth, expected) in cases {
        assert_eq!(select_cascade(depth, edges), expected, "depth {depth}");
    }
}

#[test]
fn depth_past_far_uses_last_cascade() {
    let edges = cascade_far_edges(SPLITS, 100.0);
    assert_eq!(select_cascade(250.0, edges), CASCADE_COUNT - 1);
}

#[test]
fn sub_frustum_corners_land_inside_cascade() {
    let camera = Camera::default();
    let cascades = compute_cascades(&camera, SPLITS, sun(), RESOLUTION);
    let edges = cascade_far_edges(SPLITS, camera.far);
    let nears = [camera.near, edges[0], edges[1]];
    let tolerance = 2.0 / RESOLUTION as f32 + 1e-4;

    for (index, cascade) in cascades.iter().enumerate() {
        for corner in frustum_corners(&camera, nears[index], edges[index]) {
            let clip = cascade.view_proj * corner.extend(1.0);
            let ndc = clip.xyz() / clip.w;
            assert!(ndc.x.abs() <= 1.0 + tolerance, "cascade {index} x {}", ndc.x);
            assert!(ndc.y.abs() <= 1.0 + tolerance, "cascade {index} y {}", ndc.y);
            assert!((-1e-4..=1.0 + 1e-4).contains(&ndc.z), "cascade {index} z {}", ndc.z);
        }
    }
}

#[test]
fn snapped_center_is_whole_texels() {
    let mut camera = Camera::default();
    for step in 0..4 {
        camera.eye += Vec3::new(0.137, 0.0, -0.291) * step as f32;
        for cascade in compute_cascades(&camera, SPLITS, sun(), RESOLUTION) {
            for value in [cascade.center.x, cascade.center.y] {
                let texels = value / cascade.texel;
                assert!((texels - texels.round()).abs() < 1e-2, "{texels}");
            }
        }
    }
}

#[test]
fn cascades_grow_with_distance() {
    let cascades = compute_cascades(&Camera::default(), SPLITS, sun(), RESOLUTION);
    assert!(cascades[0].radius < cascades[1].radius);
    assert!(cascades[1].radius < cascades[2].radius);
    assert!(cascades[0].texel < cascades[2].texel);
}

#[test]
fn point_faces_see_their_axis() {
    let position = Vec3::new(2.0, 3.0, -1.0);
    let faces = face_view_projs(position, 0.1, 100.0);
    for (face, direction) in FACE_DIRECTIONS.iter().enumerate() {
        let target = position + *direction * 5.0;
        let clip = faces[face] * target.extend(1.0);
        let ndc = clip.xyz() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4, "face {face}");
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
        assert_eq!(select_face(target - position), face);
    }
}

#[test]
fn selected_face_contains_the_fragment() {
    let position = Vec3::ZERO;
    let faces = face_view_projs(position, 0.1, 100.0);
    let samples = [
        Vec3::new(3.0, 1.0, -2.0),
        Vec3::new(-0.5, 4.0, 3.9),
        Vec3::new(0.2, -7.0, 1.0),
        Vec3::new(-1.0, 2.0, -6.0),
    ];
    for sample in samples {
        let face = select_face(sample - position);
        let clip = faces[face] * sample.extend(1.0);
        let ndc = clip.xyz() / clip.w;
        assert!(clip.w > 0.0);
        assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0, "{sample:?} -> {face}");
    }
}

#[test]
fn phases_visit_point_stages_only_with_caster() {
    assert_eq!(
        ShadowPhase::frame_sequence(false),
        vec![
            ShadowPhase::CascadesComputing,
            ShadowPhase::CascadesRendering,
            ShadowPhase::Idle,
        ]
    );
    assert_eq!(
        ShadowPhase::frame_sequence(true),
        vec![
            ShadowPhase::CascadesComputing,
            ShadowPhase::CascadesRendering,
            ShadowPhase::PointComputing,
            ShadowPhase::PointRendering,
            ShadowPhase::Idle,
        ]
    );
}
