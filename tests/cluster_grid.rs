// CPU reference for the cluster build and cull compute passes.
use clustered_deferred::renderer::cluster::{ClusterAabb, ClusterLayout};
use clustered_deferred::renderer::uniforms::PointLightRaw;
use clustered_deferred::scene::Camera;
use glam::{Mat4, Vec2, Vec3, Vec4};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn layout(max_lights: u32) -> ClusterLayout {
    ClusterLayout::new([16, 9, 24], max_lights, [WIDTH, HEIGHT], 0.1, 100.0)
}

fn projection() -> Mat4 {
    Mat4::perspective_rh(60f32.to_radians(), WIDTH as f32 / HEIGHT as f32, 0.1, 100.0)
}

/// View-space position of the surface seen through `pixel` at `depth`.
fn view_position(pixel: Vec2, depth: f32, inverse_proj: Mat4) -> Vec3 {
    let ndc = Vec4::new(
        pixel.x / WIDTH as f32 * 2.0 - 1.0,
        1.0 - pixel.y / HEIGHT as f32 * 2.0,
        0.0,
        1.0,
    );
    let p = inverse_proj * ndc;
    let near_point = p.truncate() / p.w;
    near_point * (-depth / near_point.z)
}

#[test]
fn build_is_bit_identical_for_same_projection() {
    let l = layout(64);
    let inverse = projection().inverse();
    let first = l.compute_aabbs(inverse);
    let second = l.compute_aabbs(inverse);
    assert_eq!(first.len(), 16 * 9 * 24);

    let bits = |aabbs: &[ClusterAabb]| -> Vec<u32> {
        aabbs
            .iter()
            .flat_map(|a| a.min.iter().chain(a.max.iter()).map(|f| f.to_bits()).collect::<Vec<_>>())
            .collect()
    };
    assert_eq!(bits(&first), bits(&second));
}

#[test]
fn aabbs_do_not_depend_on_camera_pose() {
    let l = layout(64);
    let mut camera = Camera {
        aspect: WIDTH as f32 / HEIGHT as f32,
        ..Camera::default()
    };
    let before = l.compute_aabbs(camera.proj().inverse());

    camera.eye = Vec3::new(-12.0, 3.0, 7.5);
    camera.target = Vec3::new(4.0, 0.5, -2.0);
    camera.orbit(0.8, -0.3);
    assert_ne!(camera.view(), Camera::default().view());
    let after = l.compute_aabbs(camera.proj().inverse());

    assert_eq!(before, after);
}

#[test]
fn aabbs_follow_the_projection() {
    let l = layout(64);
    let wide = Mat4::perspective_rh(90f32.to_radians(), WIDTH as f32 / HEIGHT as f32, 0.1, 100.0);
    let narrow = l.compute_aabbs(projection().inverse());
    let widened = l.compute_aabbs(wide.inverse());
    assert_ne!(narrow, widened);

    // A wider field of view spreads the outer tiles further sideways.
    let last_tile = 15;
    assert!(widened[last_tile].max().x > narrow[last_tile].max().x);
}

#[test]
fn fragment_lies_in_its_cluster_aabb() {
    let l = layout(64);
    let inverse = projection().inverse();
    let aabbs = l.compute_aabbs(inverse);

    let pixels = [
        Vec2::new(0.5, 0.5),
        Vec2::new(640.5, 360.5),
        Vec2::new(1279.5, 719.5),
        Vec2::new(100.5, 600.5),
        Vec2::new(1000.5, 50.5),
    ];
    let depths = [0.15, 0.9, 3.3, 10.0, 27.5, 64.0, 99.0];

    for pixel in pixels {
        for depth in depths {
            let index = l.cluster_index(pixel, depth);
            let p = view_position(pixel, depth, inverse);
            assert!(
                aabbs[index as usize].contains(p, 1e-3 * depth),
                "pixel {pixel:?} depth {depth} -> cluster {index} {:?} misses {p:?}",
                aabbs[index as usize]
            );
        }
    }
}

#[test]
fn slice_lookup_matches_slice_bounds() {
    let l = layout(64);
    for slice in 0..24 {
        let (near, far) = l.slice_bounds(slice);
        let mid = (near * far).sqrt();
        assert_eq!(l.slice_for_depth(mid), slice);
    }
}

#[test]
fn cull_lists_exactly_the_intersecting_clusters() {
    let l = layout(64);
    let inverse = projection().inverse();
    let aabbs = l.compute_aabbs(inverse);

    let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 10.0), Vec3::ZERO, Vec3::Y);
    let mut lights = vec![
        PointLightRaw::new(Vec3::new(-3.0, 1.0, 0.0), 2.5, Vec3::ONE, 3.0),
        PointLightRaw::new(Vec3::new(4.0, 0.5, -6.0), 4.0, Vec3::X, 5.0),
    ];
    let before = l.cull_lights(&aabbs, &lights, view);

    // Move the second light and re-cull: membership follows the new sphere.
    lights[1] = PointLightRaw::new(Vec3::new(0.0, 0.0, 5.0), 1.0, Vec3::X, 5.0);
    let after = l.cull_lights(&aabbs, &lights, view);
    assert_ne!(before, after);

    for (light_index, light) in lights.iter().enumerate() {
        let center = view.transform_point3(light.position());
        for (cluster, aabb) in aabbs.iter().enumerate() {
            let listed = after
                .lights_in(cluster as u32, l.max_lights)
                .contains(&(light_index as u32));
            assert_eq!(
                listed,
                aabb.intersects_sphere(center, light.radius()),
                "light {light_index} cluster {cluster}"
            );
        }
    }
    assert_eq!(after.overflowed, 0);
}

#[test]
fn cap_truncates_and_reports_overflow() {
    let l = layout(2);
    let aabbs = l.compute_aabbs(projection().inverse());

    // Five lights on top of each other in front of the camera.
    let lights: Vec<_> = (0..5)
        .map(|_| PointLightRaw::new(Vec3::new(0.0, 0.0, -5.0), 1.0, Vec3::ONE, 1.0))
        .collect();
    let result = l.cull_lights(&aabbs, &lights, Mat4::IDENTITY);

    assert!(result.overflowed > 0);
    assert!(result.counts.iter().all(|&c| c <= 2));
    let center_cluster = l.cluster_index(Vec2::new(640.5, 360.5), 5.0);
    assert_eq!(result.lights_in(center_cluster, 2), &[0, 1]);
}
