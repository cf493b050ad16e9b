use clustered_deferred::renderer::plan::{
    FramePlan, FrameStage, ResolveRoute, SkipReason, StageAction, STENCIL_BACKGROUND, STENCIL_LIT,
};
use clustered_deferred::renderer::postprocess::{composite, tonemap, PostEffects, PostParams};
use clustered_deferred::asset::Handle;
use clustered_deferred::scene::{EntityDesc, EntityStore, FramePacket, PointLight, ShadowCaster};
use clustered_deferred::settings::{BloomSettings, TonemapSettings};
use glam::Vec3;

fn effects(bloom: bool, ssao: bool) -> PostEffects {
    PostEffects { bloom, ssao }
}

#[test]
fn empty_scene_without_caster_runs_nine_stages() {
    let plan = FramePlan::new(&FramePacket::default(), effects(true, true));

    assert_eq!(plan.steps().len(), 10);
    assert_eq!(
        plan.steps()[3],
        (
            FrameStage::PointShadow,
            StageAction::Skip(SkipReason::NoShadowCaster)
        )
    );
    let executed: Vec<_> = plan.executed().collect();
    assert_eq!(executed.len(), 9);
    assert_eq!(executed.first(), Some(&FrameStage::UpdateGlobals));
    assert_eq!(executed.last(), Some(&FrameStage::Present));
}

#[test]
fn caster_enables_point_shadow_stage() {
    let packet = FramePacket {
        caster: Some(ShadowCaster {
            position: Vec3::new(0.0, 3.0, 0.0),
            light_index: 0,
            slot: 4,
        }),
        ..FramePacket::default()
    };
    let plan = FramePlan::new(&packet, effects(false, false));
    assert!(plan.runs(FrameStage::PointShadow));
    assert!(!plan.runs(FrameStage::AmbientOcclusion));
    assert!(!plan.bloom());
}

#[test]
fn shadows_precede_lighting_and_geometry_precedes_ao() {
    let plan = FramePlan::new(&FramePacket::default(), effects(true, true));
    let order: Vec<_> = plan.executed().collect();
    let at = |stage| order.iter().position(|&s| s == stage).unwrap();

    assert!(at(FrameStage::ClusterBuildCull) < at(FrameStage::LightingResolve));
    assert!(at(FrameStage::DirectionalShadows) < at(FrameStage::LightingResolve));
    assert!(at(FrameStage::Geometry) < at(FrameStage::AmbientOcclusion));
    assert!(at(FrameStage::AmbientOcclusion) < at(FrameStage::LightingResolve));
    assert!(at(FrameStage::LightingResolve) < at(FrameStage::Forward));
    assert!(at(FrameStage::Forward) < at(FrameStage::PostProcess));
}

#[test]
fn stencil_partitions_every_pixel() {
    // Every value the geometry pass can leave behind maps to exactly one route.
    for stencil in 0..=255u32 {
        let route = ResolveRoute::for_stencil(stencil);
        let lit = route == ResolveRoute::Lit;
        let passthrough = route == ResolveRoute::Passthrough;
        assert!(lit ^ passthrough);
        assert_eq!(lit, stencil == STENCIL_LIT);
    }
    assert_eq!(
        ResolveRoute::for_stencil(STENCIL_BACKGROUND),
        ResolveRoute::Passthrough
    );
}

#[test]
fn empty_store_draws_only_the_sky() {
    let store = EntityStore::new();
    let packet = FramePacket::build(&store, Vec3::new(0.0, 6.0, 18.0), false);
    assert!(packet.is_empty());
    assert!(packet.point_lights.is_empty());
    assert_eq!(packet.caster, None);

    let plan = FramePlan::new(&packet, effects(true, true));
    assert!(!plan.runs(FrameStage::PointShadow));
    assert_eq!(plan.executed().count(), 9);

    // Only the cleared background value is left, and it resolves unlit.
    assert_eq!(plan.resolve_routes(), [ResolveRoute::Passthrough]);
    assert_eq!(
        ResolveRoute::for_stencil(STENCIL_BACKGROUND),
        plan.resolve_routes()[0]
    );
}

#[test]
fn mixed_store_fills_every_batch_and_casts() {
    let cube = Handle::new(0, 0);
    let sphere = Handle::new(1, 0);
    let mut store = EntityStore::new();
    store.add_object(EntityDesc::new(cube));
    store.add_object(EntityDesc::new(cube).at(Vec3::new(4.0, 0.0, 0.0)));
    let (lamp, _) = store.add_object(
        EntityDesc::new(sphere)
            .at(Vec3::new(0.0, 3.0, 0.0))
            .emitting(PointLight::default()),
    );
    store.add_object(EntityDesc::new(sphere).at(Vec3::new(0.0, 2.0, 0.0)).transparent());
    store.set_shadow_caster(Some(lamp)).unwrap();

    let packet = FramePacket::build(&store, Vec3::new(0.0, 6.0, 18.0), false);
    assert_eq!(packet.objects.len(), 4);
    assert_eq!(packet.opaque.len(), 1);
    assert_eq!(packet.opaque[0].count, 2);
    assert_eq!(packet.emissive.len(), 1);
    assert_eq!(packet.transparent.len(), 1);
    assert_eq!(packet.occluders, packet.opaque);
    assert_eq!(packet.point_lights.len(), 1);
    assert_eq!(packet.caster.map(|c| c.slot), Some(lamp));

    let plan = FramePlan::new(&packet, effects(false, true));
    assert_eq!(plan.executed().count(), 10);
    assert_eq!(
        plan.resolve_routes(),
        [ResolveRoute::Lit, ResolveRoute::Passthrough]
    );
    for &route in plan.resolve_routes() {
        assert_eq!(ResolveRoute::for_stencil(route.stencil_reference()), route);
    }
    assert_eq!(plan.resolve_routes()[0].stencil_reference(), STENCIL_LIT);
}

#[test]
fn bloom_off_composite_is_plain_tonemap() {
    let bloom = BloomSettings::default();
    let tone = TonemapSettings::default();
    let off = PostParams::new(&bloom, &tone, false);
    let on = PostParams::new(&bloom, &tone, true);

    let hdr = Vec3::new(0.4, 0.2, 2.5);
    let expected = tonemap(hdr, tone.exposure, tone.gamma);
    assert_eq!(composite(hdr, Vec3::splat(3.0), &off), expected);
    assert_eq!(composite(hdr, Vec3::ZERO, &on), expected);
}
