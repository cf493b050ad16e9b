//! Shadow maps: three directional cascades plus a six-face map for the one
//! active point-light caster.

pub mod cascades;
pub mod point;

use std::mem;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::asset::Assets;
use crate::error::{RenderError, RenderResult, ResultExt};
use crate::renderer::context::RenderContext;
use crate::renderer::draw::draw_batches;
use crate::renderer::pipeline_builder::{pipeline_layout, PipelineBuilder};
use crate::renderer::resources::{ShadowTarget, UniformBuffer};
use crate::renderer::shaders::ShaderSet;
use crate::renderer::Vertex;
use crate::scene::frame::{DrawBatch, ShadowCaster};
use crate::scene::Camera;
use crate::settings::ShadowSettings;

pub use cascades::{compute_cascades, select_cascade, Cascade, CASCADE_COUNT};
pub use point::{face_view_projs, select_face, FACE_COUNT};

/// Depth offset applied when comparing against the point map, in NDC depth.
const POINT_DEPTH_BIAS: f32 = 0.0002;

/// Normal offset as a multiple of the first cascade's texel size.
const NORMAL_OFFSET_TEXELS: f32 = 1.5;

const VIEW_SLOTS: usize = CASCADE_COUNT + FACE_COUNT;

/// Per-frame progress of the shadow subsystem. The point phases are entered
/// only when a caster exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadowPhase {
    Idle,
    CascadesComputing,
    CascadesRendering,
    PointComputing,
    PointRendering,
}

impl ShadowPhase {
    pub fn next(self, has_caster: bool) -> ShadowPhase {
        match self {
            ShadowPhase::Idle => ShadowPhase::CascadesComputing,
            ShadowPhase::CascadesComputing => ShadowPhase::CascadesRendering,
            ShadowPhase::CascadesRendering if has_caster => ShadowPhase::PointComputing,
            ShadowPhase::CascadesRendering => ShadowPhase::Idle,
            ShadowPhase::PointComputing => ShadowPhase::PointRendering,
            ShadowPhase::PointRendering => ShadowPhase::Idle,
        }
    }

    /// Phases visited by one frame, starting after `Idle` and ending on it.
    pub fn frame_sequence(has_caster: bool) -> Vec<ShadowPhase> {
        let mut phases = Vec::with_capacity(5);
        let mut phase = ShadowPhase::Idle;
        loop {
            phase = phase.next(has_caster);
            phases.push(phase);
            if phase == ShadowPhase::Idle {
                return phases;
            }
        }
    }
}

/// Runtime side of the phase machine: where the subsystem is and which
/// phases the current frame has passed through.
#[derive(Debug)]
pub struct ShadowCycle {
    phase: ShadowPhase,
    visited: Vec<ShadowPhase>,
}

impl Default for ShadowCycle {
    fn default() -> Self {
        Self {
            phase: ShadowPhase::Idle,
            visited: Vec::with_capacity(5),
        }
    }
}

impl ShadowCycle {
    pub fn phase(&self) -> ShadowPhase {
        self.phase
    }

    /// Forgets the previous frame. Only valid between frames.
    pub fn begin_frame(&mut self) {
        debug_assert_eq!(self.phase, ShadowPhase::Idle);
        self.visited.clear();
    }

    pub fn advance(&mut self, has_caster: bool) {
        let next = self.phase.next(has_caster);
        log::trace!("Shadow phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
        self.visited.push(next);
    }

    pub fn visited(&self) -> &[ShadowPhase] {
        &self.visited
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ShadowViewUniform {
    view_proj: [[f32; 4]; 4],
}

/// Light-space data sampled by the lighting and forward passes (group 2).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct ShadowData {
    pub cascade_view_proj: [[[f32; 4]; 4]; CASCADE_COUNT],
    pub point_view_proj: [[[f32; 4]; 4]; FACE_COUNT],
    /// xyz far edge per cascade, w cascade texel size in uv.
    pub cascade_splits: [f32; 4],
    /// xyz caster position, w point texel size in uv.
    pub point_light: [f32; 4],
    /// x normal offset, y point depth bias.
    pub params: [f32; 4],
}

impl ShadowData {
    pub fn set_cascades(&mut self, cascades: &[Cascade; CASCADE_COUNT], far_edges: [f32; 3], resolution: u32) {
        self.cascade_view_proj = cascades.map(|c| c.view_proj.to_cols_array_2d());
        self.cascade_splits = [
            far_edges[0],
            far_edges[1],
            far_edges[2],
            1.0 / resolution as f32,
        ];
        self.params[0] = cascades[0].texel * NORMAL_OFFSET_TEXELS;
        self.params[1] = POINT_DEPTH_BIAS;
    }

    pub fn set_point(&mut self, faces: &[Mat4; FACE_COUNT], position: Vec3, resolution: u32) {
        self.point_view_proj = faces.map(|m| m.to_cols_array_2d());
        self.point_light = position.extend(1.0 / resolution as f32).to_array();
    }
}

pub struct ShadowSystem {
    cascades: ShadowTarget,
    point: ShadowTarget,
    _sampler: wgpu::Sampler,
    data: UniformBuffer<ShadowData>,
    cpu_data: ShadowData,
    view_uniform: UniformBuffer<ShadowViewUniform>,
    staging: wgpu::Buffer,
    view_bind_group: wgpu::BindGroup,
    sample_layout: wgpu::BindGroupLayout,
    sample_bind_group: wgpu::BindGroup,
    pipeline: wgpu::RenderPipeline,
    settings: ShadowSettings,
    cycle: ShadowCycle,
    last_caster: Option<usize>,
}

impl ShadowSystem {
    pub fn new(
        context: &RenderContext,
        shaders: &ShaderSet,
        frame_layout: &wgpu::BindGroupLayout,
        settings: &ShadowSettings,
    ) -> RenderResult<Self> {
        let device = &context.device;
        let cascades = ShadowTarget::new(
            context,
            "CascadeShadowMap",
            CASCADE_COUNT as u32,
            settings.cascade_resolution,
        )
        .context(RenderError::general("allocating cascade shadow map"))?;
        let point = ShadowTarget::new(
            context,
            "PointShadowMap",
            FACE_COUNT as u32,
            settings.point_resolution,
        )
        .context(RenderError::general("allocating point shadow map"))?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("ShadowSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        let data = UniformBuffer::<ShadowData>::new(device, "ShadowDataBuffer");
        let view_uniform = UniformBuffer::<ShadowViewUniform>::new(device, "ShadowViewBuffer");
        let view_size = mem::size_of::<ShadowViewUniform>() as u64;
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ShadowStagingBuffer"),
            size: view_size * VIEW_SLOTS as u64,
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        log::info!(
            "Shadow staging buffer: {} views x {} bytes",
            VIEW_SLOTS,
            view_size
        );

        let view_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ShadowViewLayout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(view_size),
                },
                count: None,
            }],
        });
        let view_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ShadowViewBindGroup"),
            layout: &view_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: view_uniform.binding(),
            }],
        });

        let depth_array = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Depth,
                view_dimension: wgpu::TextureViewDimension::D2Array,
                multisampled: false,
            },
            count: None,
        };
        let sample_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ShadowSampleLayout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(mem::size_of::<ShadowData>() as u64),
                    },
                    count: None,
                },
                depth_array(1),
                depth_array(2),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                    count: None,
                },
            ],
        });
        let sample_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ShadowSampleBindGroup"),
            layout: &sample_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: data.binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(cascades.array_view()),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(point.array_view()),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let layout = pipeline_layout(device, "ShadowPipelineLayout", &[frame_layout, &view_layout]);
        let pipeline = PipelineBuilder::new("ShadowPipeline", &layout, shaders.get("shadow")?)
            .depth_only()
            .with_vertex_buffer(Vertex::position_layout())
            .with_cull_mode(Some(wgpu::Face::Front))
            .with_unclipped_depth(context.supports_depth_clip_control)
            .with_depth(ShadowTarget::FORMAT, true, wgpu::CompareFunction::LessEqual)
            .with_depth_bias(settings.depth_bias_constant, settings.depth_bias_slope)
            .build(context)
            .context(RenderError::general("creating shadow pipeline"))?;

        Ok(Self {
            cascades,
            point,
            _sampler: sampler,
            data,
            cpu_data: ShadowData::zeroed(),
            view_uniform,
            staging,
            view_bind_group,
            sample_layout,
            sample_bind_group,
            pipeline,
            settings: settings.clone(),
            cycle: ShadowCycle::default(),
            last_caster: None,
        })
    }

    pub fn sample_layout(&self) -> &wgpu::BindGroupLayout {
        &self.sample_layout
    }

    pub fn sample_bind_group(&self) -> &wgpu::BindGroup {
        &self.sample_bind_group
    }

    /// Phases the last frame went through, ending on `Idle` when complete.
    pub fn frame_phases(&self) -> &[ShadowPhase] {
        self.cycle.visited()
    }

    fn write_view(&self, queue: &wgpu::Queue, slot: usize, view_proj: Mat4) {
        let uniform = ShadowViewUniform {
            view_proj: view_proj.to_cols_array_2d(),
        };
        let offset = (slot * mem::size_of::<ShadowViewUniform>()) as u64;
        queue.write_buffer(&self.staging, offset, bytemuck::bytes_of(&uniform));
    }

    /// Computes the cascade matrices and renders occluders into each cascade
    /// layer. Ends in `Idle` unless a caster follows.
    #[allow(clippy::too_many_arguments)]
    pub fn render_cascades(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        assets: &Assets,
        frame_bind_group: &wgpu::BindGroup,
        occluders: &[DrawBatch],
        camera: &Camera,
        sun_direction: Vec3,
        has_caster: bool,
    ) {
        self.cycle.begin_frame();
        self.cycle.advance(has_caster);

        let resolution = self.settings.cascade_resolution;
        let cascades = compute_cascades(camera, self.settings.cascade_splits, sun_direction, resolution);
        let far_edges = cascades::cascade_far_edges(self.settings.cascade_splits, camera.far);
        self.cpu_data.set_cascades(&cascades, far_edges, resolution);
        for (slot, cascade) in cascades.iter().enumerate() {
            self.write_view(&context.queue, slot, cascade.view_proj);
        }
        self.data.write(&context.queue, &self.cpu_data);

        self.cycle.advance(has_caster);
        for layer in 0..CASCADE_COUNT {
            self.render_layer(encoder, assets, frame_bind_group, occluders, layer, false);
        }

        if !has_caster {
            self.cycle.advance(has_caster);
        }
    }

    /// Six face passes for the active caster.
    pub fn render_point(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        assets: &Assets,
        frame_bind_group: &wgpu::BindGroup,
        occluders: &[DrawBatch],
        caster: &ShadowCaster,
        camera: &Camera,
    ) {
        debug_assert_eq!(self.cycle.phase(), ShadowPhase::CascadesRendering);
        if self.last_caster != Some(caster.slot) {
            log::info!("Point shadow caster is now slot {}", caster.slot);
            self.last_caster = Some(caster.slot);
        }
        self.cycle.advance(true);

        let faces = face_view_projs(caster.position, camera.near, camera.far);
        self.cpu_data
            .set_point(&faces, caster.position, self.settings.point_resolution);
        for (face, view_proj) in faces.iter().enumerate() {
            self.write_view(&context.queue, CASCADE_COUNT + face, *view_proj);
        }
        self.data.write(&context.queue, &self.cpu_data);

        self.cycle.advance(true);
        for face in 0..FACE_COUNT {
            self.render_layer(encoder, assets, frame_bind_group, occluders, face, true);
        }
        self.cycle.advance(true);
    }

    /// Called when no caster exists so the next caster change is logged.
    pub fn clear_caster(&mut self) {
        if self.last_caster.take().is_some() {
            log::info!("No point shadow caster");
        }
    }

    fn render_layer(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        assets: &Assets,
        frame_bind_group: &wgpu::BindGroup,
        occluders: &[DrawBatch],
        layer: usize,
        point: bool,
    ) {
        let (target, slot) = if point {
            (&self.point, CASCADE_COUNT + layer)
        } else {
            (&self.cascades, layer)
        };
        let view_size = mem::size_of::<ShadowViewUniform>() as u64;
        encoder.copy_buffer_to_buffer(
            &self.staging,
            slot as u64 * view_size,
            self.view_uniform.buffer(),
            0,
            view_size,
        );

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(if point { "PointShadowPass" } else { "CascadeShadowPass" }),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: target.layer_view(layer),
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, frame_bind_group, &[]);
        pass.set_bind_group(1, &self.view_bind_group, &[]);
        draw_batches(&mut pass, assets, occluders);
    }

    pub fn release(self) {
        self.cascades.release();
        self.point.release();
        self.data.release();
        self.view_uniform.release();
        self.staging.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_data_matches_wgsl_layout() {
        assert_eq!(mem::size_of::<ShadowData>(), 9 * 64 + 3 * 16);
    }

    #[test]
    fn cycle_records_each_frame_separately() {
        let mut cycle = ShadowCycle::default();
        for has_caster in [true, false, true] {
            cycle.begin_frame();
            while cycle.visited().last() != Some(&ShadowPhase::Idle) {
                cycle.advance(has_caster);
            }
            assert_eq!(cycle.visited(), ShadowPhase::frame_sequence(has_caster).as_slice());
            assert_eq!(cycle.phase(), ShadowPhase::Idle);
        }
    }

    #[test]
    fn cycle_without_caster_never_enters_point_phases() {
        let mut cycle = ShadowCycle::default();
        cycle.begin_frame();
        for _ in 0..3 {
            cycle.advance(false);
        }
        assert_eq!(
            cycle.visited(),
            [
                ShadowPhase::CascadesComputing,
                ShadowPhase::CascadesRendering,
                ShadowPhase::Idle
            ]
        );
    }

    #[test]
    fn cascade_data_records_edges_and_texel() {
        let camera = Camera::default();
        let cascades = compute_cascades(&camera, [10.0, 30.0], Vec3::new(-0.3, -1.0, -0.2), 2048);
        let mut data = ShadowData::zeroed();
        data.set_cascades(&cascades, [10.0, 30.0, 100.0], 2048);
        assert_eq!(data.cascade_splits[..3], [10.0, 30.0, 100.0]);
        assert!((data.cascade_splits[3] - 1.0 / 2048.0).abs() < f32::EPSILON);
        assert!(data.params[0] > 0.0);
    }
}
