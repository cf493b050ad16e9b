use std::sync::Arc;
use std::time::Instant;

use glam::{Quat, Vec3, Vec4};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::*,
    event_loop::ActiveEventLoop,
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::asset::Assets;
use crate::error::{ErrorStack, GraphicsErrorCode, RenderError, RenderResult, ResultExt};
use crate::renderer::postprocess::PostEffects;
use crate::renderer::primitives::{cube_mesh, plane_mesh, sphere_mesh};
use crate::renderer::Renderer;
use crate::scene::{Camera, EntityDesc, EntityStore, FramePacket, Material, PointLight};
use crate::settings::RenderSettings;

const ORBIT_STEP: f32 = 0.08;
const EMITTER_COLORS: [Vec3; 6] = [
    Vec3::new(1.0, 0.35, 0.2),
    Vec3::new(0.2, 0.6, 1.0),
    Vec3::new(0.4, 1.0, 0.35),
    Vec3::new(1.0, 0.85, 0.3),
    Vec3::new(0.85, 0.3, 1.0),
    Vec3::new(0.3, 1.0, 0.9),
];

/// Cube heights step through 1, 2, 3 along the grid diagonals.
fn cube_height(x: i32, z: i32) -> f32 {
    1.0 + (x + z).rem_euclid(3) as f32
}

/// Emitter slot after `current` in slot order, wrapping to the first. With no
/// current caster the first emitter is picked.
pub fn next_caster(emitters: &[usize], current: Option<usize>) -> Option<usize> {
    let first = emitters.first().copied();
    match current {
        None => first,
        Some(current) => emitters
            .iter()
            .copied()
            .find(|&slot| slot > current)
            .or(first),
    }
}

struct Orbiter {
    slot: usize,
    radius: f32,
    height: f32,
    speed: f32,
    phase: f32,
}

impl Orbiter {
    fn position(&self, time: f32) -> Vec3 {
        let angle = self.phase + time * self.speed;
        Vec3::new(
            self.radius * angle.cos(),
            self.height + 0.5 * (time * 0.7 + self.phase).sin(),
            self.radius * angle.sin(),
        )
    }
}

/// Ground plane, a grid of cubes, orbiting lamps and one glass sphere.
#[derive(Default)]
pub struct DemoScene {
    store: EntityStore,
    orbiters: Vec<Orbiter>,
    template: Option<usize>,
    spawned: Vec<usize>,
}

impl DemoScene {
    pub fn populate(&mut self, renderer: &Renderer, assets: &mut Assets) {
        let (vertices, indices) = plane_mesh(30.0, 8.0);
        let plane = renderer.create_mesh(assets, "Plane", &vertices, &indices);
        let (vertices, indices) = cube_mesh();
        let cube = renderer.create_mesh(assets, "Cube", &vertices, &indices);
        let (vertices, indices) = sphere_mesh(32, 16);
        let sphere = renderer.create_mesh(assets, "Sphere", &vertices, &indices);

        self.store.add_object(EntityDesc::new(plane).with_material(Material {
            albedo: Vec4::new(0.55, 0.55, 0.52, 1.0),
            roughness: 0.9,
            metallic: 0.0,
        }));

        for x in -2i32..=2 {
            for z in -2i32..=2 {
                if x == 0 && z == 0 {
                    continue;
                }
                let height = cube_height(x, z);
                let (slot, _) = self.store.add_object(
                    EntityDesc::new(cube)
                        .at(Vec3::new(x as f32 * 5.0, height * 0.5, z as f32 * 5.0))
                        .scaled(Vec3::new(1.0, height, 1.0))
                        .with_material(Material {
                            albedo: Vec4::new(
                                0.3 + 0.1 * (x + 2) as f32,
                                0.4,
                                0.3 + 0.1 * (z + 2) as f32,
                                1.0,
                            ),
                            roughness: 0.35 + 0.1 * (x + 2) as f32,
                            metallic: if (x + z) % 2 == 0 { 0.6 } else { 0.0 },
                        }),
                );
                self.template.get_or_insert(slot);
            }
        }

        let count = EMITTER_COLORS.len();
        for (i, color) in EMITTER_COLORS.iter().enumerate() {
            let orbiter = Orbiter {
                slot: 0,
                radius: 6.0 + 2.5 * (i % 3) as f32,
                height: 2.0 + (i % 2) as f32 * 1.5,
                speed: 0.4 + 0.1 * i as f32,
                phase: i as f32 * std::f32::consts::TAU / count as f32,
            };
            let (slot, _) = self.store.add_object(
                EntityDesc::new(sphere)
                    .at(orbiter.position(0.0))
                    .scaled(Vec3::splat(0.25))
                    .emitting(PointLight {
                        color: *color,
                        intensity: 6.0,
                        radius: 10.0,
                    }),
            );
            self.orbiters.push(Orbiter { slot, ..orbiter });
        }

        self.store.add_object(
            EntityDesc::new(sphere)
                .at(Vec3::new(0.0, 2.0, 0.0))
                .scaled(Vec3::splat(1.5))
                .with_material(Material {
                    albedo: Vec4::new(0.3, 0.6, 1.0, 0.35),
                    roughness: 0.1,
                    metallic: 0.0,
                })
                .transparent(),
        );

        log::info!(
            "Demo scene: {} entities, {} emitters",
            self.store.len(),
            self.store.emitters().count()
        );
    }

    pub fn update(&mut self, time: f32) {
        for orbiter in &self.orbiters {
            if self.store.is_alive(orbiter.slot) {
                if let Err(err) = self.store.set_position(orbiter.slot, orbiter.position(time)) {
                    log::warn!("Orbiter {} not moved: {err}", orbiter.slot);
                }
            }
        }
        for (i, &slot) in self.spawned.iter().enumerate() {
            let spin = Quat::from_rotation_y(time * (0.5 + 0.1 * i as f32));
            if let Err(err) = self.store.set_rotation(slot, spin) {
                log::warn!("Spawned slot {slot} not rotated: {err}");
            }
        }
    }

    pub fn cycle_caster(&mut self) -> Result<(), RenderError> {
        let emitters: Vec<_> = self.store.emitters().collect();
        let next = next_caster(&emitters, self.store.shadow_caster());
        self.store.set_shadow_caster(next)
    }

    pub fn duplicate(&mut self) -> Result<(), RenderError> {
        let Some(template) = self.template else {
            return Ok(());
        };
        let step = self.spawned.len() as f32 + 1.0;
        let (slot, id) = self
            .store
            .duplicate(template, Vec3::new(1.5 * step, 2.0, 1.5 * step))?;
        log::info!("Duplicated slot {} into slot {} (entity {})", template, slot, id);
        self.spawned.push(slot);
        Ok(())
    }

    pub fn delete_last(&mut self) -> Result<(), RenderError> {
        match self.spawned.pop() {
            Some(slot) => self.store.del_object(slot),
            None => Ok(()),
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }
}

pub struct App {
    settings: RenderSettings,
    window: Option<Arc<Window>>,
    window_id: Option<WindowId>,
    renderer: Option<Renderer>,
    assets: Assets,
    scene: DemoScene,
    camera: Camera,
    started: Instant,
    error: Option<ErrorStack>,
}

impl App {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            settings,
            window: None,
            window_id: None,
            renderer: None,
            assets: Assets::new(),
            scene: DemoScene::default(),
            camera: Camera::default(),
            started: Instant::now(),
            error: None,
        }
    }

    /// The error that stopped the event loop, if any.
    pub fn take_error(&mut self) -> Option<ErrorStack> {
        self.error.take()
    }

    fn initialize(&mut self, event_loop: &ActiveEventLoop) -> RenderResult<()> {
        let resolution = &self.settings.resolution;
        let attributes = Window::default_attributes()
            .with_title("clustered deferred")
            .with_inner_size(PhysicalSize::new(resolution.width, resolution.height));
        let window = Arc::new(event_loop.create_window(attributes).map_err(|err| {
            RenderError::graphics(GraphicsErrorCode::SurfaceUnavailable, err.to_string())
        })?);

        let renderer = pollster::block_on(Renderer::new(
            window.clone(),
            self.settings.clone(),
            &mut self.assets,
        ))
        .context(RenderError::general("starting renderer"))?;

        let size = renderer.surface_size();
        self.camera.set_aspect(size.width, size.height);
        self.scene.populate(&renderer, &mut self.assets);

        self.window_id = Some(window.id());
        window.request_redraw();
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: ErrorStack) {
        log::error!("Stopping after error:");
        error.log();
        self.error = Some(error);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.take() {
            renderer.release(&mut self.assets);
        }
        self.assets.release_all();
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        self.scene.update(self.started.elapsed().as_secs_f32());

        let packet = FramePacket::build(
            self.scene.store(),
            self.camera.position(),
            self.settings.shadows.transparent_casters,
        );
        let result = renderer
            .render(&packet, &self.camera, &self.assets)
            .map(|stats| log::trace!("Frame: {:?}", stats));
        match result {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("Surface lost or outdated; reconfiguring");
                renderer.reconfigure();
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                let error = ErrorStack::new(RenderError::NoMemory("surface acquisition".into()));
                self.fail(event_loop, error);
                return;
            }
            Err(err) => log::warn!("Skipping frame: {err}"),
        }

        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn on_key(&mut self, key: Key, event_loop: &ActiveEventLoop) -> Result<(), RenderError> {
        match key.as_ref() {
            Key::Named(NamedKey::Escape) => self.shutdown(event_loop),
            Key::Named(NamedKey::Space) => self.scene.cycle_caster()?,
            Key::Named(NamedKey::Delete) => self.scene.delete_last()?,
            Key::Named(NamedKey::ArrowLeft) => self.camera.orbit(-ORBIT_STEP, 0.0),
            Key::Named(NamedKey::ArrowRight) => self.camera.orbit(ORBIT_STEP, 0.0),
            Key::Named(NamedKey::ArrowUp) => self.camera.orbit(0.0, ORBIT_STEP),
            Key::Named(NamedKey::ArrowDown) => self.camera.orbit(0.0, -ORBIT_STEP),
            Key::Character("d") | Key::Character("D") => self.scene.duplicate()?,
            Key::Character("b") | Key::Character("B") => self.toggle(|fx| fx.bloom = !fx.bloom),
            Key::Character("o") | Key::Character("O") => self.toggle(|fx| fx.ssao = !fx.ssao),
            _ => {}
        }
        Ok(())
    }

    fn toggle(&mut self, change: impl FnOnce(&mut PostEffects)) {
        if let Some(renderer) = self.renderer.as_mut() {
            let mut effects = renderer.effects();
            change(&mut effects);
            renderer.set_effects(effects);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(error) = self.initialize(event_loop) {
            self.fail(event_loop, error);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if Some(id) != self.window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => self.shutdown(event_loop),
            WindowEvent::Resized(size) => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                self.camera.set_aspect(size.width, size.height);
                if let Err(error) = renderer.resize(size) {
                    self.fail(event_loop, error);
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key,
                        state: ElementState::Pressed,
                        repeat,
                        ..
                    },
                ..
            } => {
                let orbiting = matches!(
                    logical_key,
                    Key::Named(
                        NamedKey::ArrowLeft
                            | NamedKey::ArrowRight
                            | NamedKey::ArrowUp
                            | NamedKey::ArrowDown
                    )
                );
                if repeat && !orbiting {
                    return;
                }
                if let Err(err) = self.on_key(logical_key, event_loop) {
                    log::warn!("Ignoring key: {err}");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caster_cycles_in_slot_order_and_wraps() {
        let emitters = [3, 5, 9];
        assert_eq!(next_caster(&emitters, None), Some(3));
        assert_eq!(next_caster(&emitters, Some(3)), Some(5));
        assert_eq!(next_caster(&emitters, Some(9)), Some(3));
        assert_eq!(next_caster(&emitters, Some(4)), Some(5));
        assert_eq!(next_caster(&[], Some(4)), None);
    }

    #[test]
    fn cube_heights_stay_positive_across_the_grid() {
        for x in -2i32..=2 {
            for z in -2i32..=2 {
                let h = cube_height(x, z);
                assert!((1.0..=3.0).contains(&h), "({x}, {z}) -> {h}");
            }
        }
        assert_eq!(cube_height(-2, -2), 3.0);
        assert_eq!(cube_height(-1, 1), 1.0);
    }

    #[test]
    fn update_moves_live_orbiters_and_survives_dead_slots() {
        let mesh = crate::asset::Handle::new(0, 0);
        let mut scene = DemoScene::default();
        let lamp = EntityDesc::new(mesh).emitting(PointLight::default());
        let (live, _) = scene.store.add_object(lamp);
        let (dead, _) = scene.store.add_object(lamp);
        let ring = |slot| Orbiter {
            slot,
            radius: 4.0,
            height: 1.0,
            speed: 1.0,
            phase: 0.0,
        };
        scene.orbiters.push(ring(live));
        scene.orbiters.push(ring(dead));
        scene.spawned.push(dead);
        scene.store.del_object(dead).unwrap();

        scene.update(2.0);
        assert_eq!(scene.store.get(live).unwrap().position(), ring(live).position(2.0));
        assert!(scene.store.get(dead).is_none());
    }

    #[test]
    fn orbiters_stay_on_their_ring() {
        let orbiter = Orbiter {
            slot: 0,
            radius: 6.0,
            height: 2.0,
            speed: 0.5,
            phase: 1.0,
        };
        for t in [0.0, 1.3, 7.9] {
            let p = orbiter.position(t);
            assert!((Vec3::new(p.x, 0.0, p.z).length() - 6.0).abs() < 1e-4);
            assert!((p.y - 2.0).abs() <= 0.5 + 1e-6);
        }
    }
}
