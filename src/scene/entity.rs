use bitflags::bitflags;
use glam::{Mat4, Quat, Vec3, Vec4};

use crate::asset::MeshHandle;
use crate::error::RenderError;

pub type EntityId = u64;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct EntityFlags: u32 {
        const VISIBLE = 1 << 0;
        const EMIT_LIGHT = 1 << 1;
        const TRANSPARENT = 1 << 2;
    }
}

impl Default for EntityFlags {
    fn default() -> Self {
        EntityFlags::VISIBLE
    }
}

/// How a drawable is routed through the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DrawClass {
    /// Written to the G-buffer, lit by the deferred resolve.
    Opaque,
    /// Drawn flat in the forward pass and contributes a point light.
    Emitter,
    /// Blended and lit in the forward pass.
    Transparent,
}

impl DrawClass {
    pub fn from_flags(flags: EntityFlags) -> Self {
        if flags.contains(EntityFlags::EMIT_LIGHT) {
            DrawClass::Emitter
        } else if flags.contains(EntityFlags::TRANSPARENT) {
            DrawClass::Transparent
        } else {
            DrawClass::Opaque
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    /// rgb albedo, a opacity (only used for transparent entities).
    pub albedo: Vec4,
    pub roughness: f32,
    pub metallic: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: Vec4::new(0.8, 0.8, 0.8, 1.0),
            roughness: 0.6,
            metallic: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub color: Vec3,
    pub intensity: f32,
    /// Sphere of influence used by the cluster cull.
    pub radius: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 4.0,
            radius: 8.0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EntityDesc {
    pub mesh: MeshHandle,
    pub position: Vec3,
    pub scale: Vec3,
    pub rotation: Quat,
    pub material: Material,
    pub light: PointLight,
    pub flags: EntityFlags,
}

impl EntityDesc {
    pub fn new(mesh: MeshHandle) -> Self {
        Self {
            mesh,
            position: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation: Quat::IDENTITY,
            material: Material::default(),
            light: PointLight::default(),
            flags: EntityFlags::VISIBLE,
        }
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn scaled(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn emitting(mut self, light: PointLight) -> Self {
        self.light = light;
        self.flags |= EntityFlags::EMIT_LIGHT;
        self
    }

    pub fn transparent(mut self) -> Self {
        self.flags |= EntityFlags::TRANSPARENT;
        self
    }
}

/// Read-only view of one alive slot.
#[derive(Clone, Copy, Debug)]
pub struct EntityRef<'a> {
    store: &'a EntityStore,
    slot: usize,
}

impl<'a> EntityRef<'a> {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn id(&self) -> EntityId {
        self.store.ids[self.slot]
    }

    pub fn mesh(&self) -> MeshHandle {
        self.store.meshes[self.slot]
    }

    pub fn position(&self) -> Vec3 {
        self.store.positions[self.slot]
    }

    pub fn scale(&self) -> Vec3 {
        self.store.scales[self.slot]
    }

    pub fn rotation(&self) -> Quat {
        self.store.rotations[self.slot]
    }

    pub fn material(&self) -> Material {
        self.store.materials[self.slot]
    }

    pub fn light(&self) -> PointLight {
        self.store.lights[self.slot]
    }

    pub fn flags(&self) -> EntityFlags {
        self.store.flags[self.slot]
    }

    pub fn draw_class(&self) -> DrawClass {
        DrawClass::from_flags(self.flags())
    }

    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale(), self.rotation(), self.position())
    }
}

/// Dense, slot-stable storage for renderable instances.
///
/// State lives in parallel arrays indexed by slot. Deleting a slot marks it
/// dead and pushes it on a free list; the next `add_object` pops it back
/// (last freed, first reused). Identifiers come from a monotonic counter and
/// are never handed out twice.
#[derive(Debug, Default)]
pub struct EntityStore {
    ids: Vec<EntityId>,
    alive: Vec<bool>,
    meshes: Vec<MeshHandle>,
    positions: Vec<Vec3>,
    scales: Vec<Vec3>,
    rotations: Vec<Quat>,
    materials: Vec<Material>,
    lights: Vec<PointLight>,
    flags: Vec<EntityFlags>,
    free: Vec<usize>,
    next_id: EntityId,
    live: usize,
    shadow_caster: Option<usize>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&mut self, desc: EntityDesc) -> (usize, EntityId) {
        let id = self.next_id;
        self.next_id += 1;
        self.live += 1;

        let slot = match self.free.pop() {
            Some(slot) => {
                self.ids[slot] = id;
                self.alive[slot] = true;
                self.meshes[slot] = desc.mesh;
                self.positions[slot] = desc.position;
                self.scales[slot] = desc.scale;
                self.rotations[slot] = desc.rotation;
                self.materials[slot] = desc.material;
                self.lights[slot] = desc.light;
                self.flags[slot] = desc.flags;
                slot
            }
            None => {
                self.ids.push(id);
                self.alive.push(true);
                self.meshes.push(desc.mesh);
                self.positions.push(desc.position);
                self.scales.push(desc.scale);
                self.rotations.push(desc.rotation);
                self.materials.push(desc.material);
                self.lights.push(desc.light);
                self.flags.push(desc.flags);
                self.ids.len() - 1
            }
        };

        if self.shadow_caster.is_none() && desc.flags.contains(EntityFlags::EMIT_LIGHT) {
            log::info!("Shadow caster set to slot {} (entity {})", slot, id);
            self.shadow_caster = Some(slot);
        }

        (slot, id)
    }

    pub fn del_object(&mut self, slot: usize) -> Result<(), RenderError> {
        self.check_alive(slot)?;
        self.alive[slot] = false;
        self.free.push(slot);
        self.live -= 1;

        if self.shadow_caster == Some(slot) {
            log::info!("Shadow caster slot {} deleted; point shadow disabled", slot);
            self.shadow_caster = None;
        }
        Ok(())
    }

    /// Copies every per-slot attribute into a new (or reused) slot, moved by
    /// `offset`. The copy gets a fresh identifier.
    pub fn duplicate(&mut self, slot: usize, offset: Vec3) -> Result<(usize, EntityId), RenderError> {
        self.check_alive(slot)?;
        let desc = EntityDesc {
            mesh: self.meshes[slot],
            position: self.positions[slot] + offset,
            scale: self.scales[slot],
            rotation: self.rotations[slot],
            material: self.materials[slot],
            light: self.lights[slot],
            flags: self.flags[slot],
        };
        Ok(self.add_object(desc))
    }

    /// Explicitly chooses which emitter casts the point shadow. `None`
    /// disables the point-shadow stage.
    pub fn set_shadow_caster(&mut self, slot: Option<usize>) -> Result<(), RenderError> {
        if let Some(slot) = slot {
            self.check_alive(slot)?;
            if !self.flags[slot].contains(EntityFlags::EMIT_LIGHT) {
                return Err(RenderError::logic(format!(
                    "slot {slot} does not emit light and cannot cast a point shadow"
                )));
            }
        }
        if self.shadow_caster != slot {
            log::info!("Shadow caster changed {:?} -> {:?}", self.shadow_caster, slot);
        }
        self.shadow_caster = slot;
        Ok(())
    }

    /// The active caster, if it is still alive, visible and emitting.
    pub fn shadow_caster(&self) -> Option<usize> {
        self.shadow_caster.filter(|&slot| {
            self.is_alive(slot)
                && self.flags[slot].contains(EntityFlags::EMIT_LIGHT | EntityFlags::VISIBLE)
        })
    }

    /// Emitter slots in slot order, used to cycle the caster.
    pub fn emitters(&self) -> impl Iterator<Item = usize> + '_ {
        self.iter_alive()
            .filter(|e| e.flags().contains(EntityFlags::EMIT_LIGHT))
            .map(|e| e.slot())
    }

    pub fn get(&self, slot: usize) -> Option<EntityRef<'_>> {
        self.is_alive(slot).then_some(EntityRef { store: self, slot })
    }

    pub fn is_alive(&self, slot: usize) -> bool {
        self.alive.get(slot).copied().unwrap_or(false)
    }

    pub fn iter_alive(&self) -> impl Iterator<Item = EntityRef<'_>> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(move |(slot, _)| EntityRef { store: self, slot })
    }

    pub fn set_position(&mut self, slot: usize, position: Vec3) -> Result<(), RenderError> {
        self.check_alive(slot)?;
        self.positions[slot] = position;
        Ok(())
    }

    pub fn set_rotation(&mut self, slot: usize, rotation: Quat) -> Result<(), RenderError> {
        self.check_alive(slot)?;
        self.rotations[slot] = rotation;
        Ok(())
    }

    pub fn set_light(&mut self, slot: usize, light: PointLight) -> Result<(), RenderError> {
        self.check_alive(slot)?;
        self.lights[slot] = light;
        Ok(())
    }

    pub fn set_flags(&mut self, slot: usize, flags: EntityFlags) -> Result<(), RenderError> {
        self.check_alive(slot)?;
        self.flags[slot] = flags;
        Ok(())
    }

    /// Live entity count.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots ever allocated, dead ones included.
    pub fn capacity(&self) -> usize {
        self.alive.len()
    }

    fn check_alive(&self, slot: usize) -> Result<(), RenderError> {
        if self.is_alive(slot) {
            Ok(())
        } else {
            Err(RenderError::logic(format!("entity slot {slot} is not alive")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Handle;

    fn desc() -> EntityDesc {
        EntityDesc::new(Handle::new(0, 0))
    }

    #[test]
    fn draw_class_prefers_emitter() {
        let flags = EntityFlags::VISIBLE | EntityFlags::EMIT_LIGHT | EntityFlags::TRANSPARENT;
        assert_eq!(DrawClass::from_flags(flags), DrawClass::Emitter);
        assert_eq!(
            DrawClass::from_flags(EntityFlags::VISIBLE | EntityFlags::TRANSPARENT),
            DrawClass::Transparent
        );
        assert_eq!(DrawClass::from_flags(EntityFlags::VISIBLE), DrawClass::Opaque);
    }

    #[test]
    fn first_emitter_becomes_caster() {
        let mut store = EntityStore::new();
        store.add_object(desc());
        let (lamp, _) = store.add_object(desc().emitting(PointLight::default()));
        let (second, _) = store.add_object(desc().emitting(PointLight::default()));

        assert_eq!(store.shadow_caster(), Some(lamp));
        store.del_object(lamp).unwrap();
        assert_eq!(store.shadow_caster(), None);

        store.set_shadow_caster(Some(second)).unwrap();
        assert_eq!(store.shadow_caster(), Some(second));
    }

    #[test]
    fn caster_must_emit() {
        let mut store = EntityStore::new();
        let (slot, _) = store.add_object(desc());
        assert!(store.set_shadow_caster(Some(slot)).is_err());
        assert!(store.set_shadow_caster(None).is_ok());
    }

    #[test]
    fn model_matrix_composes_trs() {
        let mut store = EntityStore::new();
        let (slot, _) = store.add_object(desc().at(Vec3::new(1.0, 2.0, 3.0)).scaled(Vec3::splat(2.0)));
        let m = store.get(slot).unwrap().model_matrix();
        let p = m.transform_point3(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::new(3.0, 2.0, 3.0), 1e-6));
    }
}
