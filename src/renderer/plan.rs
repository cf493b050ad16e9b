use crate::renderer::postprocess::PostEffects;
use crate::scene::FramePacket;

/// Stencil reference written by the sky fill; resolved as pass-through.
pub const STENCIL_BACKGROUND: u32 = 0;
/// Stencil reference written by opaque geometry; resolved with full lighting.
pub const STENCIL_LIT: u32 = 1;

/// The fixed per-frame pass order. Each stage reads what earlier ones wrote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameStage {
    UpdateGlobals,
    ClusterBuildCull,
    DirectionalShadows,
    PointShadow,
    Geometry,
    AmbientOcclusion,
    LightingResolve,
    Forward,
    PostProcess,
    Present,
}

impl FrameStage {
    pub const ALL: [FrameStage; 10] = [
        FrameStage::UpdateGlobals,
        FrameStage::ClusterBuildCull,
        FrameStage::DirectionalShadows,
        FrameStage::PointShadow,
        FrameStage::Geometry,
        FrameStage::AmbientOcclusion,
        FrameStage::LightingResolve,
        FrameStage::Forward,
        FrameStage::PostProcess,
        FrameStage::Present,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NoShadowCaster,
    SsaoDisabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageAction {
    Run,
    Skip(SkipReason),
}

/// Which resolve program a fragment gets. Every stencil value maps to exactly
/// one route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveRoute {
    Lit,
    Passthrough,
}

impl ResolveRoute {
    pub fn for_stencil(stencil: u32) -> Self {
        if stencil == STENCIL_LIT {
            ResolveRoute::Lit
        } else {
            ResolveRoute::Passthrough
        }
    }

    pub fn stencil_reference(self) -> u32 {
        match self {
            ResolveRoute::Lit => STENCIL_LIT,
            ResolveRoute::Passthrough => STENCIL_BACKGROUND,
        }
    }
}

/// The stage list for one frame, decided before any command is recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramePlan {
    steps: Vec<(FrameStage, StageAction)>,
    routes: Vec<ResolveRoute>,
    bloom: bool,
}

impl FramePlan {
    pub fn new(packet: &FramePacket, effects: PostEffects) -> Self {
        let steps = FrameStage::ALL
            .iter()
            .map(|&stage| {
                let action = match stage {
                    FrameStage::PointShadow if packet.caster.is_none() => {
                        StageAction::Skip(SkipReason::NoShadowCaster)
                    }
                    FrameStage::AmbientOcclusion if !effects.ssao => {
                        StageAction::Skip(SkipReason::SsaoDisabled)
                    }
                    _ => StageAction::Run,
                };
                (stage, action)
            })
            .collect();

        // The sky always leaves background pixels; lit ones exist only under
        // opaque geometry.
        let mut routes = Vec::with_capacity(2);
        if !packet.opaque.is_empty() {
            routes.push(ResolveRoute::Lit);
        }
        routes.push(ResolveRoute::Passthrough);

        Self {
            steps,
            routes,
            bloom: effects.bloom,
        }
    }

    pub fn steps(&self) -> &[(FrameStage, StageAction)] {
        &self.steps
    }

    pub fn runs(&self, stage: FrameStage) -> bool {
        self.steps
            .iter()
            .any(|&(s, action)| s == stage && action == StageAction::Run)
    }

    pub fn executed(&self) -> impl Iterator<Item = FrameStage> + '_ {
        self.steps
            .iter()
            .filter(|(_, action)| *action == StageAction::Run)
            .map(|(stage, _)| *stage)
    }

    /// Resolve draws for the lighting stage, lit first.
    pub fn resolve_routes(&self) -> &[ResolveRoute] {
        &self.routes
    }

    /// Bloom is part of the post-process stage, not a stage of its own.
    pub fn bloom(&self) -> bool {
        self.bloom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_keep_fixed_order() {
        let plan = FramePlan::new(&FramePacket::default(), PostEffects { bloom: true, ssao: true });
        let order: Vec<_> = plan.steps().iter().map(|(stage, _)| *stage).collect();
        assert_eq!(order, FrameStage::ALL);
    }

    #[test]
    fn ssao_toggle_skips_its_stage() {
        let plan = FramePlan::new(&FramePacket::default(), PostEffects { bloom: true, ssao: false });
        assert!(!plan.runs(FrameStage::AmbientOcclusion));
        assert!(plan.runs(FrameStage::LightingResolve));
    }

    #[test]
    fn routes_round_trip_through_reference() {
        for route in [ResolveRoute::Lit, ResolveRoute::Passthrough] {
            assert_eq!(ResolveRoute::for_stencil(route.stencil_reference()), route);
        }
    }
}
