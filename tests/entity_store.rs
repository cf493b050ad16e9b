use clustered_deferred::asset::Handle;
use clustered_deferred::scene::{EntityDesc, EntityFlags, EntityStore, FramePacket, PointLight};
use glam::Vec3;

fn cube() -> EntityDesc {
    EntityDesc::new(Handle::new(0, 0))
}

#[test]
fn freed_slots_are_reused_last_in_first_out() {
    let mut store = EntityStore::new();
    let slots: Vec<usize> = (0..5).map(|_| store.add_object(cube()).0).collect();

    store.del_object(slots[1]).unwrap();
    store.del_object(slots[3]).unwrap();

    assert_eq!(store.add_object(cube()).0, slots[3]);
    assert_eq!(store.add_object(cube()).0, slots[1]);
    assert_eq!(store.add_object(cube()).0, 5);
    assert_eq!(store.capacity(), 6);
}

#[test]
fn dead_slots_are_not_iterated() {
    let mut store = EntityStore::new();
    let (a, _) = store.add_object(cube());
    let (b, _) = store.add_object(cube());
    let (c, _) = store.add_object(cube());
    store.del_object(b).unwrap();

    let alive: Vec<usize> = store.iter_alive().map(|e| e.slot()).collect();
    assert_eq!(alive, vec![a, c]);
    assert_eq!(store.len(), 2);
    assert!(store.get(b).is_none());
    assert!(store.del_object(b).is_err());
}

#[test]
fn identifiers_are_never_reused() {
    let mut store = EntityStore::new();
    let (slot, first) = store.add_object(cube());
    store.del_object(slot).unwrap();
    let (again, second) = store.add_object(cube());

    assert_eq!(slot, again);
    assert_ne!(first, second);
    assert!(second > first);
}

#[test]
fn duplicate_copies_attributes_with_offset() {
    let mut store = EntityStore::new();
    let light = PointLight {
        color: Vec3::new(1.0, 0.5, 0.25),
        intensity: 3.0,
        radius: 5.0,
    };
    let (lamp, lamp_id) = store.add_object(cube().at(Vec3::new(1.0, 2.0, 3.0)).emitting(light));
    let (copy, copy_id) = store.duplicate(lamp, Vec3::X).unwrap();

    assert_ne!(copy, lamp);
    assert_ne!(copy_id, lamp_id);
    let copied = store.get(copy).unwrap();
    assert_eq!(copied.position(), Vec3::new(2.0, 2.0, 3.0));
    assert_eq!(copied.light(), light);
    assert!(copied.flags().contains(EntityFlags::EMIT_LIGHT));
    assert!(store.duplicate(99, Vec3::ZERO).is_err());
}

#[test]
fn deleting_caster_removes_point_shadow() {
    let mut store = EntityStore::new();
    let (lamp, _) = store.add_object(cube().emitting(PointLight::default()));
    let (other, _) = store.add_object(cube().emitting(PointLight::default()));

    assert!(FramePacket::build(&store, Vec3::ZERO, false).caster.is_some());
    store.del_object(lamp).unwrap();
    let packet = FramePacket::build(&store, Vec3::ZERO, false);
    assert!(packet.caster.is_none());
    assert_eq!(packet.point_lights.len(), 1);

    store.set_shadow_caster(Some(other)).unwrap();
    let packet = FramePacket::build(&store, Vec3::ZERO, false);
    assert_eq!(packet.caster.map(|c| c.slot), Some(other));
}

#[test]
fn hidden_entities_are_not_drawn() {
    let mut store = EntityStore::new();
    let (slot, _) = store.add_object(cube());
    store.add_object(cube());
    store.set_flags(slot, EntityFlags::empty()).unwrap();

    let packet = FramePacket::build(&store, Vec3::ZERO, false);
    assert_eq!(packet.objects.len(), 1);
    assert_eq!(packet.opaque.len(), 1);
}
