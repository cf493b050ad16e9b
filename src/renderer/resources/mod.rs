//! Owning wrappers around GPU buffers and textures. Every wrapper is torn down
//! with an explicit `release`, never on drop.

mod buffer;
mod shadow;
mod target;

pub use buffer::{StorageBuffer, UniformBuffer};
pub use shadow::ShadowTarget;
pub use target::{ColorTarget, DepthStencilTarget, GBuffer};
