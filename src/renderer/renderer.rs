use std::sync::Arc;

use glam::Vec3;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::asset::{Assets, GpuTexture, Mesh, MeshHandle, TextureHandle};
use crate::error::{RenderError, RenderResult, ResultExt};
use crate::renderer::cluster::{ClusterGrid, ClusterLayout};
use crate::renderer::context::RenderContext;
use crate::renderer::draw::draw_batches;
use crate::renderer::pipeline_builder::{pipeline_layout, PipelineBuilder};
use crate::renderer::plan::{FramePlan, FrameStage, ResolveRoute, StageAction, STENCIL_BACKGROUND, STENCIL_LIT};
use crate::renderer::postprocess::ssao::texture_entry;
use crate::renderer::postprocess::{PostEffects, PostProcess};
use crate::renderer::resources::{ColorTarget, DepthStencilTarget, GBuffer, StorageBuffer, UniformBuffer};
use crate::renderer::shaders::ShaderSet;
use crate::renderer::shadows::{ShadowPhase, ShadowSystem};
use crate::renderer::uniforms::{
    GlobalUniform, ObjectData, PointLightRaw, FRAME_FLAG_POINT_SHADOW, FRAME_FLAG_SKY_TEXTURE,
    FRAME_FLAG_SSAO,
};
use crate::renderer::Vertex;
use crate::scene::{Camera, FramePacket};
use crate::settings::RenderSettings;

pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

const INITIAL_OBJECTS: u32 = 256;
const INITIAL_LIGHTS: u32 = 64;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SunLight {
    /// Direction the light travels.
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub ambient: Vec3,
}

impl Default for SunLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.4, -1.0, -0.3).normalize(),
            color: Vec3::new(1.0, 0.96, 0.9),
            intensity: 2.5,
            ambient: Vec3::new(0.05, 0.06, 0.08),
        }
    }
}

/// Bits for `GlobalUniform::light_counts.w`.
pub fn frame_flags(effects: PostEffects, sky_textured: bool, has_caster: bool) -> u32 {
    let mut flags = 0;
    if effects.ssao {
        flags |= FRAME_FLAG_SSAO;
    }
    if sky_textured {
        flags |= FRAME_FLAG_SKY_TEXTURE;
    }
    if has_caster {
        flags |= FRAME_FLAG_POINT_SHADOW;
    }
    flags
}

/// What the last frame did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub stages: Vec<FrameStage>,
    pub draw_calls: u32,
    pub point_lights: u32,
    pub bloom: bool,
    pub shadow_phases: Vec<ShadowPhase>,
}

/// Group 0: globals, per-object data and point lights. Shared by every pass.
struct FrameResources {
    globals: UniformBuffer<GlobalUniform>,
    objects: StorageBuffer<ObjectData>,
    lights: StorageBuffer<PointLightRaw>,
    layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
}

impl FrameResources {
    fn new(device: &wgpu::Device) -> Self {
        let visibility =
            wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT | wgpu::ShaderStages::COMPUTE;
        let storage = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("FrameLayout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage(1),
                storage(2),
            ],
        });

        let globals = UniformBuffer::new(device, "GlobalUniformBuffer");
        let objects = StorageBuffer::new(device, "ObjectStorageBuffer", INITIAL_OBJECTS);
        let lights = StorageBuffer::new(device, "PointLightStorageBuffer", INITIAL_LIGHTS);
        let bind_group = Self::create_bind_group(device, &layout, &globals, &objects, &lights);

        Self {
            globals,
            objects,
            lights,
            layout,
            bind_group,
        }
    }

    fn create_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        globals: &UniformBuffer<GlobalUniform>,
        objects: &StorageBuffer<ObjectData>,
        lights: &StorageBuffer<PointLightRaw>,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("FrameBindGroup"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: globals.binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: objects.binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: lights.binding(),
                },
            ],
        })
    }

    fn upload(&mut self, context: &RenderContext, globals: &GlobalUniform, packet: &FramePacket) {
        let device = &context.device;
        self.globals.write(&context.queue, globals);
        let objects_grew = self.objects.write(device, &context.queue, &packet.objects);
        let lights_grew = self.lights.write(device, &context.queue, &packet.point_lights);
        if objects_grew || lights_grew {
            self.bind_group =
                Self::create_bind_group(device, &self.layout, &self.globals, &self.objects, &self.lights);
        }
    }

    fn release(self) {
        self.globals.release();
        self.objects.release();
        self.lights.release();
    }
}

/// Background fill source: the configured texture, or a 1x1 placeholder while
/// the shader draws the gradient.
struct SkyBinding {
    layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    handle: Option<TextureHandle>,
    placeholder: Option<GpuTexture>,
}

impl SkyBinding {
    fn new(context: &RenderContext, settings: &RenderSettings, assets: &mut Assets) -> Self {
        let device = &context.device;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SkyLayout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("SkySampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let handle = settings.sky.texture.as_ref().and_then(|path| {
            assets
                .textures
                .acquire(path)
                .map_err(|err| log::warn!("Sky texture unavailable ({err}); using gradient"))
                .ok()
        });

        let bind = |view: &wgpu::TextureView| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("SkyBindGroup"),
                layout: &layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&sampler),
                    },
                ],
            })
        };

        let uploaded = handle.and_then(|handle| {
            assets
                .textures
                .gpu_texture(device, &context.queue, handle)
                .map(|texture| bind(&texture.view))
        });
        let (bind_group, placeholder) = match uploaded {
            Some(bind_group) => (bind_group, None),
            None => {
                let placeholder =
                    GpuTexture::solid(device, &context.queue, [0, 0, 0, 255], "SkyPlaceholder");
                (bind(&placeholder.view), Some(placeholder))
            }
        };

        Self {
            layout,
            bind_group,
            handle,
            placeholder,
        }
    }

    fn textured(&self) -> bool {
        self.placeholder.is_none()
    }

    fn release(self, assets: &mut Assets) {
        if let Some(handle) = self.handle {
            assets.textures.release(handle);
        }
        if let Some(placeholder) = self.placeholder {
            placeholder.texture.destroy();
        }
    }
}

struct Pipelines {
    sky: wgpu::RenderPipeline,
    opaque: wgpu::RenderPipeline,
    lit: wgpu::RenderPipeline,
    passthrough: wgpu::RenderPipeline,
    emissive: wgpu::RenderPipeline,
    transparent: wgpu::RenderPipeline,
}

impl Pipelines {
    fn new(
        context: &RenderContext,
        shaders: &ShaderSet,
        frame_layout: &wgpu::BindGroupLayout,
        sky_layout: &wgpu::BindGroupLayout,
        cluster_layout: &wgpu::BindGroupLayout,
        shadow_layout: &wgpu::BindGroupLayout,
        gbuffer_layout: &wgpu::BindGroupLayout,
    ) -> RenderResult<Self> {
        let device = &context.device;
        let depth_format = DepthStencilTarget::FORMAT;
        let gbuffer_module = shaders.get("gbuffer")?;
        let lighting_module = shaders.get("lighting")?;
        let forward_module = shaders.get("forward")?;

        let sky_pipeline_layout = pipeline_layout(device, "SkyPipelineLayout", &[frame_layout, sky_layout]);
        let sky = PipelineBuilder::new("SkyPipeline", &sky_pipeline_layout, gbuffer_module)
            .with_vertex_entry("vs_sky")
            .with_fragment_entry("fs_sky")
            .with_cull_mode(None)
            .with_color_targets(&GBuffer::FORMATS)
            .with_depth(depth_format, false, wgpu::CompareFunction::Always)
            .with_stencil(wgpu::CompareFunction::Always, true)
            .build(context)
            .context(RenderError::general("creating sky pipeline"))?;

        let gbuffer_pipeline_layout = pipeline_layout(device, "GBufferPipelineLayout", &[frame_layout]);
        let opaque = PipelineBuilder::new("GBufferPipeline", &gbuffer_pipeline_layout, gbuffer_module)
            .with_vertex_buffer(Vertex::layout())
            .with_color_targets(&GBuffer::FORMATS)
            .with_depth(depth_format, true, wgpu::CompareFunction::Less)
            .with_stencil(wgpu::CompareFunction::Always, true)
            .build(context)
            .context(RenderError::general("creating geometry pipeline"))?;

        let lighting_pipeline_layout = pipeline_layout(
            device,
            "LightingPipelineLayout",
            &[frame_layout, cluster_layout, shadow_layout, gbuffer_layout],
        );
        let resolve = |label: &str, entry: &str| {
            PipelineBuilder::new(label, &lighting_pipeline_layout, lighting_module)
                .with_fragment_entry(entry)
                .with_cull_mode(None)
                .with_color_target(HDR_FORMAT, None)
                .with_depth(depth_format, false, wgpu::CompareFunction::Always)
                .with_stencil(wgpu::CompareFunction::Equal, false)
                .build(context)
                .with_context(|| RenderError::general(format!("creating {label}")))
        };
        let lit = resolve("LightingLitPipeline", "fs_lit")?;
        let passthrough = resolve("LightingPassthroughPipeline", "fs_passthrough")?;

        let forward_pipeline_layout = pipeline_layout(
            device,
            "ForwardPipelineLayout",
            &[frame_layout, cluster_layout, shadow_layout],
        );
        let emissive = PipelineBuilder::new("EmissivePipeline", &forward_pipeline_layout, forward_module)
            .with_vertex_buffer(Vertex::layout())
            .with_fragment_entry("fs_emissive")
            .with_color_target(HDR_FORMAT, None)
            .with_depth(depth_format, true, wgpu::CompareFunction::Less)
            .build(context)
            .context(RenderError::general("creating emissive pipeline"))?;
        let transparent =
            PipelineBuilder::new("TransparentPipeline", &forward_pipeline_layout, forward_module)
                .with_vertex_buffer(Vertex::layout())
                .with_fragment_entry("fs_transparent")
                .with_color_target(HDR_FORMAT, Some(wgpu::BlendState::ALPHA_BLENDING))
                .with_depth(depth_format, false, wgpu::CompareFunction::Less)
                .build(context)
                .context(RenderError::general("creating transparent pipeline"))?;

        Ok(Self {
            sky,
            opaque,
            lit,
            passthrough,
            emissive,
            transparent,
        })
    }

    fn resolve(&self, route: ResolveRoute) -> &wgpu::RenderPipeline {
        match route {
            ResolveRoute::Lit => &self.lit,
            ResolveRoute::Passthrough => &self.passthrough,
        }
    }
}

/// Clustered deferred frame pipeline. Owns every GPU resource it renders
/// with; scene data arrives once per frame as a [`FramePacket`].
pub struct Renderer {
    context: RenderContext,
    settings: RenderSettings,
    frame: FrameResources,
    cluster: ClusterGrid,
    shadows: ShadowSystem,
    gbuffer: GBuffer,
    hdr: ColorTarget,
    post: PostProcess,
    sky: SkyBinding,
    gbuffer_layout: wgpu::BindGroupLayout,
    gbuffer_bind_group: wgpu::BindGroup,
    pipelines: Pipelines,
    sun: SunLight,
    last_stats: FrameStats,
}

impl Renderer {
    pub async fn new(
        window: Arc<Window>,
        settings: RenderSettings,
        assets: &mut Assets,
    ) -> RenderResult<Self> {
        let context = RenderContext::new(window, &settings)
            .await
            .context(RenderError::general("creating render context"))?;
        let shaders = ShaderSet::new(&context).context(RenderError::general("building shader set"))?;

        let frame = FrameResources::new(&context.device);
        let camera = Camera::default();
        let layout = Self::cluster_layout(&context, &settings, camera.near, camera.far);
        let cluster = ClusterGrid::new(&context, &shaders, &frame.layout, layout)
            .context(RenderError::general("initializing cluster grid"))?;
        let shadows = ShadowSystem::new(&context, &shaders, &frame.layout, &settings.shadows)
            .context(RenderError::general("initializing shadow maps"))?;

        let (width, height) = (context.width(), context.height());
        let gbuffer = GBuffer::new(&context, width, height)
            .context(RenderError::general("allocating g-buffer"))?;
        let hdr = ColorTarget::new(&context, "HdrTarget", HDR_FORMAT, width, height)
            .context(RenderError::general("allocating hdr target"))?;
        let post = PostProcess::new(&context, &shaders, &frame.layout, &gbuffer, &hdr, &settings)
            .context(RenderError::general("initializing post processing"))?;
        let sky = SkyBinding::new(&context, &settings, assets);

        let fragment = wgpu::ShaderStages::FRAGMENT;
        let gbuffer_layout = context
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("GBufferReadLayout"),
                entries: &[
                    texture_entry(0, fragment),
                    texture_entry(1, fragment),
                    texture_entry(2, fragment),
                    texture_entry(3, fragment),
                ],
            });
        let gbuffer_bind_group =
            Self::create_gbuffer_bind_group(&context.device, &gbuffer_layout, &gbuffer, &post);

        let pipelines = Pipelines::new(
            &context,
            &shaders,
            &frame.layout,
            &sky.layout,
            cluster.read_layout(),
            shadows.sample_layout(),
            &gbuffer_layout,
        )
        .context(RenderError::general("creating render pipelines"))?;

        log::info!(
            "Renderer ready at {}x{} (bloom={}, ssao={}, sky texture={})",
            width,
            height,
            settings.bloom.enabled,
            settings.ssao.enabled,
            sky.textured()
        );

        Ok(Self {
            context,
            settings,
            frame,
            cluster,
            shadows,
            gbuffer,
            hdr,
            post,
            sky,
            gbuffer_layout,
            gbuffer_bind_group,
            pipelines,
            sun: SunLight::default(),
            last_stats: FrameStats::default(),
        })
    }

    fn cluster_layout(
        context: &RenderContext,
        settings: &RenderSettings,
        near: f32,
        far: f32,
    ) -> ClusterLayout {
        ClusterLayout::new(
            settings.cluster.dims,
            settings.cluster.max_lights_per_cluster,
            [context.width(), context.height()],
            near,
            far,
        )
    }

    fn create_gbuffer_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        gbuffer: &GBuffer,
        post: &PostProcess,
    ) -> wgpu::BindGroup {
        let views = [
            gbuffer.position.view(),
            gbuffer.normal.view(),
            gbuffer.albedo.view(),
            post.ao_view(),
        ];
        let entries: Vec<_> = views
            .iter()
            .enumerate()
            .map(|(binding, view)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GBufferReadBindGroup"),
            layout,
            entries: &entries,
        })
    }

    pub fn surface_size(&self) -> PhysicalSize<u32> {
        self.context.size
    }

    pub fn effects(&self) -> PostEffects {
        self.post.effects()
    }

    pub fn set_effects(&mut self, effects: PostEffects) {
        self.post.set_effects(&self.context.queue, effects);
    }

    pub fn create_mesh(
        &self,
        assets: &mut Assets,
        name: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> MeshHandle {
        assets.add_mesh(Mesh::upload(&self.context.device, name, vertices, indices))
    }

    /// Reallocates every size-dependent target. Zero sizes are ignored.
    pub fn resize(&mut self, size: PhysicalSize<u32>) -> RenderResult<()> {
        if !self.context.resize(size) {
            return Ok(());
        }
        let (width, height) = (self.context.width(), self.context.height());
        log::info!("Resizing render targets to {}x{}", width, height);

        let gbuffer = GBuffer::new(&self.context, width, height)
            .context(RenderError::general("reallocating g-buffer"))?;
        std::mem::replace(&mut self.gbuffer, gbuffer).release();
        let hdr = ColorTarget::new(&self.context, "HdrTarget", HDR_FORMAT, width, height)
            .context(RenderError::general("reallocating hdr target"))?;
        std::mem::replace(&mut self.hdr, hdr).release();

        self.post
            .resize(&self.context, &self.gbuffer, &self.hdr)
            .context(RenderError::general("resizing post processing"))?;

        let current = self.cluster.layout();
        let layout = Self::cluster_layout(&self.context, &self.settings, current.near, current.far);
        if let Err(err) = self.cluster.resize(layout) {
            log::error!("Keeping previous cluster grid: {err}");
        }

        self.gbuffer_bind_group = Self::create_gbuffer_bind_group(
            &self.context.device,
            &self.gbuffer_layout,
            &self.gbuffer,
            &self.post,
        );
        Ok(())
    }

    pub fn reconfigure(&self) {
        self.context.reconfigure();
    }

    /// Records and submits one frame. Only surface acquisition can fail here.
    pub fn render(
        &mut self,
        packet: &FramePacket,
        camera: &Camera,
        assets: &Assets,
    ) -> Result<&FrameStats, wgpu::SurfaceError> {
        self.cluster.poll_overflow(&self.context.device);

        let plan = FramePlan::new(packet, self.post.effects());
        let output = self.context.surface.get_current_texture()?;
        let target = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("FrameEncoder"),
            });

        let mut stats = FrameStats {
            bloom: plan.bloom(),
            point_lights: packet.point_lights.len() as u32,
            ..Default::default()
        };

        for &(stage, action) in plan.steps() {
            if let StageAction::Skip(reason) = action {
                log::trace!("Skipping {:?}: {:?}", stage, reason);
                continue;
            }
            stats.stages.push(stage);
            match stage {
                FrameStage::UpdateGlobals => self.update_globals(packet, camera),
                FrameStage::ClusterBuildCull => {
                    self.cluster
                        .dispatch(&mut encoder, &self.frame.bind_group, camera.proj().inverse());
                }
                FrameStage::DirectionalShadows => {
                    self.shadows.render_cascades(
                        &self.context,
                        &mut encoder,
                        assets,
                        &self.frame.bind_group,
                        &packet.occluders,
                        camera,
                        self.sun.direction,
                        packet.caster.is_some(),
                    );
                    stats.draw_calls += 3 * packet.occluders.len() as u32;
                }
                FrameStage::PointShadow => {
                    if let Some(caster) = &packet.caster {
                        self.shadows.render_point(
                            &self.context,
                            &mut encoder,
                            assets,
                            &self.frame.bind_group,
                            &packet.occluders,
                            caster,
                            camera,
                        );
                        stats.draw_calls += 6 * packet.occluders.len() as u32;
                    }
                }
                FrameStage::Geometry => {
                    stats.draw_calls += self.geometry_pass(&mut encoder, packet, assets);
                }
                FrameStage::AmbientOcclusion => {
                    self.post.run_ssao(&mut encoder, &self.frame.bind_group);
                }
                FrameStage::LightingResolve => {
                    stats.draw_calls += self.lighting_pass(&mut encoder, plan.resolve_routes());
                }
                FrameStage::Forward => {
                    stats.draw_calls += self.forward_pass(&mut encoder, packet, assets);
                }
                FrameStage::PostProcess => self.post.run_post(&mut encoder, &target),
                FrameStage::Present => break,
            }
        }
        if packet.caster.is_none() {
            self.shadows.clear_caster();
        }
        stats.shadow_phases = self.shadows.frame_phases().to_vec();
        if stats.shadow_phases.last() != Some(&ShadowPhase::Idle) {
            log::warn!("Shadow work left unfinished: {:?}", stats.shadow_phases);
        }

        self.context.queue.submit(Some(encoder.finish()));
        self.cluster.after_submit();
        output.present();

        self.last_stats = stats;
        Ok(&self.last_stats)
    }

    fn update_globals(&mut self, packet: &FramePacket, camera: &Camera) {
        let layout = Self::cluster_layout(&self.context, &self.settings, camera.near, camera.far);
        if layout != *self.cluster.layout() {
            if let Err(err) = self.cluster.resize(layout) {
                log::error!("Cluster grid rejected new clip planes: {err}");
            }
        }

        let mut globals = GlobalUniform::default();
        globals.set_camera(camera.view(), camera.proj(), camera.position());
        globals.sun_direction = self.sun.direction.normalize_or_zero().extend(0.0).to_array();
        globals.sun_color = self.sun.color.extend(self.sun.intensity).to_array();
        globals.ambient = self.sun.ambient.extend(1.0).to_array();
        globals.sky_zenith = Vec3::from(self.settings.sky.zenith).extend(1.0).to_array();
        globals.sky_horizon = Vec3::from(self.settings.sky.horizon).extend(1.0).to_array();

        let layout = self.cluster.layout();
        globals.cluster_dims = [layout.dims.x, layout.dims.y, layout.dims.z, layout.max_lights];
        globals.screen_near_far = [
            layout.screen.x as f32,
            layout.screen.y as f32,
            layout.near,
            layout.far,
        ];
        globals.light_counts = [
            packet.point_lights.len() as u32,
            packet.caster.map_or(u32::MAX, |caster| caster.light_index),
            0,
            frame_flags(self.post.effects(), self.sky.textured(), packet.caster.is_some()),
        ];

        self.frame.upload(&self.context, &globals, packet);
    }

    /// Sky fill (stencil 0) then opaque geometry (stencil 1).
    fn geometry_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        packet: &FramePacket,
        assets: &Assets,
    ) -> u32 {
        let attachments = self.gbuffer.color_attachments();
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("GeometryPass"),
            color_attachments: &attachments,
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: self.gbuffer.depth_stencil.view(),
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(STENCIL_BACKGROUND),
                    store: wgpu::StoreOp::Store,
                }),
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_bind_group(0, &self.frame.bind_group, &[]);

        pass.set_pipeline(&self.pipelines.sky);
        pass.set_bind_group(1, &self.sky.bind_group, &[]);
        pass.set_stencil_reference(STENCIL_BACKGROUND);
        pass.draw(0..3, 0..1);

        pass.set_pipeline(&self.pipelines.opaque);
        pass.set_stencil_reference(STENCIL_LIT);
        draw_batches(&mut pass, assets, &packet.opaque);

        1 + packet.opaque.len() as u32
    }

    /// One full-screen draw per route; the stencil test gives every pixel
    /// exactly one.
    fn lighting_pass(&self, encoder: &mut wgpu::CommandEncoder, routes: &[ResolveRoute]) -> u32 {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("LightingResolvePass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: self.hdr.view(),
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(self.loaded_depth_stencil()),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_bind_group(0, &self.frame.bind_group, &[]);
        pass.set_bind_group(1, self.cluster.read_bind_group(), &[]);
        pass.set_bind_group(2, self.shadows.sample_bind_group(), &[]);
        pass.set_bind_group(3, &self.gbuffer_bind_group, &[]);

        for &route in routes {
            pass.set_pipeline(self.pipelines.resolve(route));
            pass.set_stencil_reference(route.stencil_reference());
            pass.draw(0..3, 0..1);
        }
        routes.len() as u32
    }

    /// Emitters flat, then transparent surfaces back to front, over the
    /// resolved HDR image and against G-buffer depth.
    fn forward_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        packet: &FramePacket,
        assets: &Assets,
    ) -> u32 {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("ForwardPass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: self.hdr.view(),
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(self.loaded_depth_stencil()),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_bind_group(0, &self.frame.bind_group, &[]);
        pass.set_bind_group(1, self.cluster.read_bind_group(), &[]);
        pass.set_bind_group(2, self.shadows.sample_bind_group(), &[]);

        pass.set_pipeline(&self.pipelines.emissive);
        draw_batches(&mut pass, assets, &packet.emissive);
        pass.set_pipeline(&self.pipelines.transparent);
        draw_batches(&mut pass, assets, &packet.transparent);

        (packet.emissive.len() + packet.transparent.len()) as u32
    }

    fn loaded_depth_stencil(&self) -> wgpu::RenderPassDepthStencilAttachment<'_> {
        let load = wgpu::Operations {
            load: wgpu::LoadOp::Load,
            store: wgpu::StoreOp::Store,
        };
        wgpu::RenderPassDepthStencilAttachment {
            view: self.gbuffer.depth_stencil.view(),
            depth_ops: Some(load),
            stencil_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            }),
        }
    }

    /// Destroys every GPU resource. The device itself goes with the context.
    pub fn release(self, assets: &mut Assets) {
        self.sky.release(assets);
        self.post.release();
        self.hdr.release();
        self.gbuffer.release();
        self.shadows.release();
        self.cluster.release();
        self.frame.release();
        log::info!("Renderer released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_follow_effects_and_caster() {
        let all = PostEffects {
            bloom: true,
            ssao: true,
        };
        assert_eq!(
            frame_flags(all, true, true),
            FRAME_FLAG_SSAO | FRAME_FLAG_SKY_TEXTURE | FRAME_FLAG_POINT_SHADOW
        );
        let none = PostEffects {
            bloom: true,
            ssao: false,
        };
        assert_eq!(frame_flags(none, false, false), 0);
        assert_eq!(frame_flags(none, false, true), FRAME_FLAG_POINT_SHADOW);
    }

    #[test]
    fn default_sun_points_down() {
        let sun = SunLight::default();
        assert!(sun.direction.y < 0.0);
        assert!((sun.direction.length() - 1.0).abs() < 1e-5);
    }
}
