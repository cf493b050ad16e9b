pub mod cluster;
pub mod context;
pub mod draw;
pub mod pipeline_builder;
pub mod plan;
pub mod postprocess;
pub mod primitives;
#[allow(clippy::module_inception)]
mod renderer;
pub mod resources;
pub mod shaders;
pub mod shadows;
pub mod uniforms;
pub mod vertex;

pub use context::RenderContext;
pub use plan::{FramePlan, FrameStage, ResolveRoute, StageAction};
pub use postprocess::PostEffects;
pub use primitives::{cube_mesh, plane_mesh, sphere_mesh};
pub use renderer::{frame_flags, FrameStats, Renderer, SunLight, HDR_FORMAT};
pub use vertex::Vertex;
