//! Screen-space passes after geometry: ambient occlusion before lighting,
//! bloom and tone mapping after it.

pub mod bloom;
pub mod ssao;

pub use bloom::{mip_sizes, BloomChain, BLOOM_FORMAT};
pub use ssao::{generate_kernel, generate_noise, SsaoParams, SsaoPass};

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::error::{RenderError, RenderResult, ResultExt};
use crate::renderer::context::RenderContext;
use crate::renderer::pipeline_builder::{pipeline_layout, PipelineBuilder};
use crate::renderer::resources::{ColorTarget, GBuffer, UniformBuffer};
use crate::renderer::shaders::ShaderSet;
use crate::settings::{BloomSettings, RenderSettings, TonemapSettings};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PostEffects {
    pub bloom: bool,
    pub ssao: bool,
}

impl PostEffects {
    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self {
            bloom: settings.bloom.enabled,
            ssao: settings.ssao.enabled,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct PostParams {
    /// threshold, knee, strength, enabled.
    pub bloom: [f32; 4],
    /// exposure, gamma.
    pub tonemap: [f32; 4],
}

impl PostParams {
    pub fn new(bloom: &BloomSettings, tonemap: &TonemapSettings, bloom_enabled: bool) -> Self {
        Self {
            bloom: [
                bloom.threshold,
                bloom.knee,
                bloom.strength,
                if bloom_enabled { 1.0 } else { 0.0 },
            ],
            tonemap: [tonemap.exposure, tonemap.gamma, 0.0, 0.0],
        }
    }

    pub fn bloom_enabled(&self) -> bool {
        self.bloom[3] > 0.5
    }
}

/// Quadratic-knee threshold used by the bloom prefilter.
pub fn soft_threshold(color: Vec3, threshold: f32, knee: f32) -> Vec3 {
    let knee = knee.max(1e-5);
    let brightness = color.max_element();
    let soft = (brightness - threshold + knee).clamp(0.0, 2.0 * knee);
    let soft = soft * soft / (4.0 * knee);
    let contribution = soft.max(brightness - threshold) / brightness.max(1e-5);
    color * contribution
}

pub fn tonemap(hdr: Vec3, exposure: f32, gamma: f32) -> Vec3 {
    let mapped = Vec3::ONE - (-hdr * exposure).exp();
    mapped.powf(1.0 / gamma)
}

/// Final colour of one pixel, as written by the composite pass.
pub fn composite(hdr: Vec3, bloom: Vec3, params: &PostParams) -> Vec3 {
    let mut color = hdr;
    if params.bloom_enabled() {
        color += bloom * params.bloom[2];
    }
    tonemap(color, params.tonemap[0], params.tonemap[1])
}

pub struct PostProcess {
    ssao: SsaoPass,
    bloom: BloomChain,
    params: UniformBuffer<PostParams>,
    bloom_settings: BloomSettings,
    tonemap_settings: TonemapSettings,
    effects: PostEffects,
    sampler: wgpu::Sampler,
    layout: wgpu::BindGroupLayout,
    prefilter_pipeline: wgpu::RenderPipeline,
    downsample_pipeline: wgpu::RenderPipeline,
    upsample_pipeline: wgpu::RenderPipeline,
    composite_pipeline: wgpu::RenderPipeline,
    composite_bind_group: wgpu::BindGroup,
}

impl PostProcess {
    pub fn new(
        context: &RenderContext,
        shaders: &ShaderSet,
        frame_layout: &wgpu::BindGroupLayout,
        gbuffer: &GBuffer,
        hdr: &ColorTarget,
        settings: &RenderSettings,
    ) -> RenderResult<Self> {
        let device = &context.device;
        let ssao = SsaoPass::new(context, shaders, frame_layout, gbuffer, &settings.ssao)
            .context(RenderError::general("initializing ssao"))?;

        let effects = PostEffects::from_settings(settings);
        let params = UniformBuffer::<PostParams>::new(device, "PostParamsBuffer");
        params.write(
            &context.queue,
            &PostParams::new(&settings.bloom, &settings.tonemap, effects.bloom),
        );

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("PostLinearSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let filtered = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("PostLayout"),
            entries: &[
                filtered(0),
                filtered(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let module = shaders.get("post")?;
        let post_layout = pipeline_layout(device, "PostPipelineLayout", &[&layout]);
        let build = |label: &str, entry: &str, format| {
            PipelineBuilder::new(label, &post_layout, module)
                .with_fragment_entry(entry)
                .with_cull_mode(None)
                .with_color_target(format, None)
                .build(context)
                .with_context(|| RenderError::general(format!("creating {label}")))
        };
        let prefilter_pipeline = build("BloomPrefilterPipeline", "fs_prefilter", BLOOM_FORMAT)?;
        let downsample_pipeline = build("BloomDownsamplePipeline", "fs_downsample", BLOOM_FORMAT)?;
        let upsample_pipeline = build("BloomUpsamplePipeline", "fs_upsample", BLOOM_FORMAT)?;
        let composite_pipeline =
            build("CompositePipeline", "fs_composite", context.surface_format())?;

        let bloom = BloomChain::new(
            context,
            &layout,
            &sampler,
            params.buffer(),
            hdr.view(),
            settings.bloom.mip_count,
        )
        .context(RenderError::general("initializing bloom chain"))?;
        let composite_bind_group = bloom::post_bind_group(
            device,
            "CompositeBindGroup",
            &layout,
            hdr.view(),
            bloom.output_view(),
            &sampler,
            params.buffer(),
        );

        Ok(Self {
            ssao,
            bloom,
            params,
            bloom_settings: settings.bloom.clone(),
            tonemap_settings: settings.tonemap.clone(),
            effects,
            sampler,
            layout,
            prefilter_pipeline,
            downsample_pipeline,
            upsample_pipeline,
            composite_pipeline,
            composite_bind_group,
        })
    }

    /// Rebuilds the size-dependent targets against new G-buffer and HDR views.
    pub fn resize(
        &mut self,
        context: &RenderContext,
        gbuffer: &GBuffer,
        hdr: &ColorTarget,
    ) -> RenderResult<()> {
        self.ssao.resize(context, gbuffer)?;

        let bloom = BloomChain::new(
            context,
            &self.layout,
            &self.sampler,
            self.params.buffer(),
            hdr.view(),
            self.bloom_settings.mip_count,
        )
        .context(RenderError::general("resizing bloom chain"))?;
        std::mem::replace(&mut self.bloom, bloom).release();

        self.composite_bind_group = bloom::post_bind_group(
            &context.device,
            "CompositeBindGroup",
            &self.layout,
            hdr.view(),
            self.bloom.output_view(),
            &self.sampler,
            self.params.buffer(),
        );
        Ok(())
    }

    pub fn effects(&self) -> PostEffects {
        self.effects
    }

    pub fn set_effects(&mut self, queue: &wgpu::Queue, effects: PostEffects) {
        if effects == self.effects {
            return;
        }
        log::info!("Post effects: bloom={} ssao={}", effects.bloom, effects.ssao);
        self.effects = effects;
        self.params.write(
            queue,
            &PostParams::new(&self.bloom_settings, &self.tonemap_settings, effects.bloom),
        );
    }

    pub fn ao_view(&self) -> &wgpu::TextureView {
        self.ssao.output_view()
    }

    pub fn run_ssao(&self, encoder: &mut wgpu::CommandEncoder, frame_bind_group: &wgpu::BindGroup) {
        self.ssao.execute(encoder, frame_bind_group);
    }

    /// Bloom chain (when enabled), then exposure and gamma into `target`.
    pub fn run_post(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        if self.effects.bloom {
            self.bloom.execute(
                encoder,
                &self.prefilter_pipeline,
                &self.downsample_pipeline,
                &self.upsample_pipeline,
            );
        }
        bloom::fullscreen_pass(
            encoder,
            "CompositePass",
            target,
            &self.composite_pipeline,
            &self.composite_bind_group,
        );
    }

    pub fn release(self) {
        self.ssao.release();
        self.bloom.release();
        self.params.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(enabled: bool) -> PostParams {
        PostParams::new(&BloomSettings::default(), &TonemapSettings::default(), enabled)
    }

    #[test]
    fn params_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<PostParams>(), 32);
    }

    #[test]
    fn threshold_removes_dim_colour() {
        assert_eq!(soft_threshold(Vec3::splat(0.2), 1.0, 0.5), Vec3::ZERO);
        let bright = soft_threshold(Vec3::new(4.0, 2.0, 1.0), 1.0, 0.5);
        assert!((bright.x - 3.0).abs() < 1e-5);
    }

    #[test]
    fn tonemap_maps_zero_to_black_and_saturates() {
        assert_eq!(tonemap(Vec3::ZERO, 1.0, 2.2), Vec3::ZERO);
        let hot = tonemap(Vec3::splat(100.0), 1.0, 2.2);
        assert!(hot.min_element() > 0.999);
    }

    #[test]
    fn disabled_bloom_ignores_bloom_input() {
        let hdr = Vec3::new(0.3, 0.6, 1.8);
        let off = params(false);
        assert_eq!(composite(hdr, Vec3::ZERO, &off), composite(hdr, Vec3::splat(5.0), &off));
        assert_eq!(composite(hdr, Vec3::splat(5.0), &off), tonemap(hdr, 1.0, 2.2));
    }

    #[test]
    fn enabled_bloom_only_adds_light() {
        let hdr = Vec3::new(0.3, 0.6, 1.8);
        let on = params(true);
        let lit = composite(hdr, Vec3::splat(0.5), &on);
        let plain = composite(hdr, Vec3::ZERO, &on);
        assert_eq!(plain, composite(hdr, Vec3::ZERO, &params(false)));
        assert!(lit.cmpge(plain).all());
    }
}
