pub mod camera;
pub mod entity;
pub mod frame;

pub use camera::Camera;
pub use entity::{DrawClass, EntityDesc, EntityFlags, EntityId, EntityRef, EntityStore, Material, PointLight};
pub use frame::{DrawBatch, FramePacket, ShadowCaster};
