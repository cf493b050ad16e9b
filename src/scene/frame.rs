use glam::Vec3;

use super::entity::{DrawClass, EntityFlags, EntityRef, EntityStore};
use crate::asset::MeshHandle;
use crate::renderer::uniforms::{ObjectData, PointLightRaw};

/// A run of instances sharing one mesh; `first_instance` indexes
/// [`FramePacket::objects`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawBatch {
    pub mesh: MeshHandle,
    pub first_instance: u32,
    pub count: u32,
}

impl DrawBatch {
    pub fn instances(&self) -> std::ops::Range<u32> {
        self.first_instance..self.first_instance + self.count
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowCaster {
    pub position: Vec3,
    /// Index into [`FramePacket::point_lights`].
    pub light_index: u32,
    pub slot: usize,
}

/// Everything the renderer reads from the scene for one frame. Built between
/// frames; the entity store is not touched while the frame is recorded.
#[derive(Clone, Debug, Default)]
pub struct FramePacket {
    pub objects: Vec<ObjectData>,
    pub opaque: Vec<DrawBatch>,
    pub emissive: Vec<DrawBatch>,
    /// Sorted back to front.
    pub transparent: Vec<DrawBatch>,
    /// Geometry rendered into shadow maps.
    pub occluders: Vec<DrawBatch>,
    pub point_lights: Vec<PointLightRaw>,
    pub caster: Option<ShadowCaster>,
}

impl FramePacket {
    pub fn build(store: &EntityStore, camera_position: Vec3, transparent_casters: bool) -> Self {
        let visible: Vec<EntityRef<'_>> = store
            .iter_alive()
            .filter(|e| e.flags().contains(EntityFlags::VISIBLE))
            .collect();

        let mut opaque: Vec<_> = visible
            .iter()
            .filter(|e| e.draw_class() == DrawClass::Opaque)
            .copied()
            .collect();
        let mut emissive: Vec<_> = visible
            .iter()
            .filter(|e| e.draw_class() == DrawClass::Emitter)
            .copied()
            .collect();
        let mut transparent: Vec<_> = visible
            .iter()
            .filter(|e| e.draw_class() == DrawClass::Transparent)
            .copied()
            .collect();

        opaque.sort_by_key(|e| (e.mesh().index(), e.mesh().generation(), e.slot()));
        emissive.sort_by_key(|e| (e.mesh().index(), e.mesh().generation(), e.slot()));
        transparent.sort_by(|a, b| {
            let da = a.position().distance_squared(camera_position);
            let db = b.position().distance_squared(camera_position);
            db.total_cmp(&da).then(a.slot().cmp(&b.slot()))
        });

        let mut packet = FramePacket::default();
        packet.opaque = packet.push_class(&opaque);
        packet.emissive = packet.push_class(&emissive);
        packet.transparent = packet.push_class(&transparent);

        packet.occluders = packet.opaque.clone();
        if transparent_casters {
            packet.occluders.extend_from_slice(&packet.transparent);
        }

        let caster_slot = store.shadow_caster();
        for entity in &emissive {
            let light = entity.light();
            let index = packet.point_lights.len() as u32;
            packet.point_lights.push(PointLightRaw::new(
                entity.position(),
                light.radius,
                light.color,
                light.intensity,
            ));
            if caster_slot == Some(entity.slot()) {
                packet.caster = Some(ShadowCaster {
                    position: entity.position(),
                    light_index: index,
                    slot: entity.slot(),
                });
            }
        }

        packet
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn push_class(&mut self, entities: &[EntityRef<'_>]) -> Vec<DrawBatch> {
        let mut batches: Vec<DrawBatch> = Vec::new();
        for entity in entities {
            let instance = self.objects.len() as u32;
            let material = entity.material();
            let emissive = if entity.draw_class() == DrawClass::Emitter {
                let light = entity.light();
                light.color * light.intensity
            } else {
                Vec3::ZERO
            };
            self.objects.push(ObjectData::new(
                entity.model_matrix(),
                material.albedo,
                emissive,
                material.roughness,
                material.metallic,
            ));

            match batches.last_mut() {
                Some(batch) if batch.mesh == entity.mesh() => batch.count += 1,
                _ => batches.push(DrawBatch {
                    mesh: entity.mesh(),
                    first_instance: instance,
                    count: 1,
                }),
            }
        }
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Handle;
    use crate::scene::entity::{EntityDesc, PointLight};

    #[test]
    fn opaque_instances_batch_by_mesh() {
        let cube = Handle::new(0, 0);
        let sphere = Handle::new(1, 0);
        let mut store = EntityStore::new();
        store.add_object(EntityDesc::new(cube));
        store.add_object(EntityDesc::new(sphere));
        store.add_object(EntityDesc::new(cube));

        let packet = FramePacket::build(&store, Vec3::ZERO, false);
        assert_eq!(packet.opaque.len(), 2);
        assert_eq!(packet.opaque[0].mesh, cube);
        assert_eq!(packet.opaque[0].count, 2);
        assert_eq!(packet.opaque[1].instances(), 2..3);
        assert_eq!(packet.occluders, packet.opaque);
    }

    #[test]
    fn transparent_sorted_back_to_front() {
        let mesh = Handle::new(0, 0);
        let mut store = EntityStore::new();
        let (near, _) = store.add_object(EntityDesc::new(mesh).at(Vec3::new(0.0, 0.0, 1.0)).transparent());
        let (far, _) = store.add_object(EntityDesc::new(mesh).at(Vec3::new(0.0, 0.0, 9.0)).transparent());

        let packet = FramePacket::build(&store, Vec3::ZERO, true);
        let first = packet.transparent[0].first_instance as usize;
        let z = packet.objects[first].model[3][2];
        assert_eq!(z, store.get(far).unwrap().position().z);
        assert_ne!(near, far);
        assert_eq!(packet.occluders.len(), packet.transparent.len());
    }

    #[test]
    fn emitters_become_lights_and_caster() {
        let mesh = Handle::new(0, 0);
        let mut store = EntityStore::new();
        store.add_object(EntityDesc::new(mesh));
        let (lamp, _) = store.add_object(
            EntityDesc::new(mesh)
                .at(Vec3::new(2.0, 3.0, 0.0))
                .emitting(PointLight::default()),
        );

        let packet = FramePacket::build(&store, Vec3::ZERO, false);
        assert_eq!(packet.point_lights.len(), 1);
        let caster = packet.caster.unwrap();
        assert_eq!(caster.slot, lamp);
        assert_eq!(caster.light_index, 0);
        assert!(packet.occluders.iter().all(|b| b.count == 1 && b.first_instance == 0));
    }
}
