use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::{RenderError, RenderResult, ResultExt};
use crate::renderer::context::RenderContext;
use crate::renderer::pipeline_builder::{pipeline_layout, PipelineBuilder};
use crate::renderer::resources::{ColorTarget, GBuffer, UniformBuffer};
use crate::renderer::shaders::ShaderSet;
use crate::settings::{SsaoSettings, MAX_SSAO_KERNEL};

pub const NOISE_TEXTURE_SIZE: u32 = 4;
pub const AO_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

const KERNEL_SEED: u64 = 0x5EED_A0;
const NOISE_SEED: u64 = 0x5EED_A1;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct SsaoParams {
    pub kernel: [[f32; 4]; MAX_SSAO_KERNEL as usize],
    /// x radius, y bias, z kernel size, w noise tile size.
    pub params: [f32; 4],
}

impl SsaoParams {
    pub fn new(settings: &SsaoSettings) -> Self {
        let mut params = Self::zeroed();
        for (slot, sample) in params
            .kernel
            .iter_mut()
            .zip(generate_kernel(settings.kernel_size, KERNEL_SEED))
        {
            *slot = sample.extend(0.0).to_array();
        }
        params.params = [
            settings.radius,
            settings.bias,
            settings.kernel_size.min(MAX_SSAO_KERNEL) as f32,
            NOISE_TEXTURE_SIZE as f32,
        ];
        params
    }
}

/// Hemisphere samples around +Z, denser towards the origin.
pub fn generate_kernel(size: u32, seed: u64) -> Vec<Vec3> {
    let size = size.min(MAX_SSAO_KERNEL);
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..size)
        .map(|i| {
            let direction = Vec3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(0.0..1.0),
            )
            .try_normalize()
            .unwrap_or(Vec3::Z);
            let t = i as f32 / size as f32;
            let scale = 0.1 + 0.9 * t * t;
            direction * rng.gen_range(0.0..1.0f32) * scale
        })
        .collect()
}

/// Rotation vectors in the tangent plane, tiled across the screen.
pub fn generate_noise(seed: u64) -> Vec<[f32; 4]> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..NOISE_TEXTURE_SIZE * NOISE_TEXTURE_SIZE)
        .map(|_| {
            [
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                0.0,
                0.0,
            ]
        })
        .collect()
}

fn create_noise_texture(device: &wgpu::Device, queue: &wgpu::Queue) -> wgpu::Texture {
    let noise = generate_noise(NOISE_SEED);
    let size = wgpu::Extent3d {
        width: NOISE_TEXTURE_SIZE,
        height: NOISE_TEXTURE_SIZE,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("SsaoNoiseTexture"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba32Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(&noise),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(16 * NOISE_TEXTURE_SIZE),
            rows_per_image: Some(NOISE_TEXTURE_SIZE),
        },
        size,
    );
    texture
}

pub(crate) fn texture_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

/// Screen-space ambient occlusion from the G-buffer, then a 4x4 blur.
pub struct SsaoPass {
    raw: ColorTarget,
    blurred: ColorTarget,
    noise: wgpu::Texture,
    noise_view: wgpu::TextureView,
    params: UniformBuffer<SsaoParams>,
    input_layout: wgpu::BindGroupLayout,
    blur_layout: wgpu::BindGroupLayout,
    input_bind_group: wgpu::BindGroup,
    blur_bind_group: wgpu::BindGroup,
    pipeline: wgpu::RenderPipeline,
    blur_pipeline: wgpu::RenderPipeline,
}

impl SsaoPass {
    pub fn new(
        context: &RenderContext,
        shaders: &ShaderSet,
        frame_layout: &wgpu::BindGroupLayout,
        gbuffer: &GBuffer,
        settings: &SsaoSettings,
    ) -> RenderResult<Self> {
        let device = &context.device;
        let (raw, blurred) = Self::create_targets(context)?;

        let noise = create_noise_texture(device, &context.queue);
        let noise_view = noise.create_view(&wgpu::TextureViewDescriptor::default());
        let params = UniformBuffer::<SsaoParams>::new(device, "SsaoParamsBuffer");
        params.write(&context.queue, &SsaoParams::new(settings));
        log::info!(
            "SSAO: {} samples, radius {}, bias {}",
            settings.kernel_size,
            settings.radius,
            settings.bias
        );

        let fragment = wgpu::ShaderStages::FRAGMENT;
        let input_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SsaoInputLayout"),
            entries: &[
                texture_entry(0, fragment),
                texture_entry(1, fragment),
                texture_entry(2, fragment),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: fragment,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let blur_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SsaoBlurLayout"),
            entries: &[texture_entry(0, fragment)],
        });

        let layout = pipeline_layout(device, "SsaoPipelineLayout", &[frame_layout, &input_layout]);
        let pipeline = PipelineBuilder::new("SsaoPipeline", &layout, shaders.get("ssao")?)
            .with_cull_mode(None)
            .with_color_target(AO_FORMAT, None)
            .build(context)
            .context(RenderError::general("creating ssao pipeline"))?;

        let blur_pipeline_layout = pipeline_layout(device, "SsaoBlurPipelineLayout", &[&blur_layout]);
        let blur_pipeline =
            PipelineBuilder::new("SsaoBlurPipeline", &blur_pipeline_layout, shaders.get("ssao_blur")?)
                .with_cull_mode(None)
                .with_color_target(AO_FORMAT, None)
                .build(context)
                .context(RenderError::general("creating ssao blur pipeline"))?;

        let input_bind_group = Self::create_input_bind_group(device, &input_layout, gbuffer, &noise_view, &params);
        let blur_bind_group = Self::create_blur_bind_group(device, &blur_layout, &raw);

        Ok(Self {
            raw,
            blurred,
            noise,
            noise_view,
            params,
            input_layout,
            blur_layout,
            input_bind_group,
            blur_bind_group,
            pipeline,
            blur_pipeline,
        })
    }

    fn create_targets(context: &RenderContext) -> RenderResult<(ColorTarget, ColorTarget)> {
        let (width, height) = (context.width(), context.height());
        let raw = ColorTarget::new(context, "SsaoRaw", AO_FORMAT, width, height)
            .context(RenderError::general("allocating ssao target"))?;
        let blurred = ColorTarget::new(context, "SsaoBlurred", AO_FORMAT, width, height)
            .context(RenderError::general("allocating ssao blur target"))?;
        Ok((raw, blurred))
    }

    fn create_input_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        gbuffer: &GBuffer,
        noise_view: &wgpu::TextureView,
        params: &UniformBuffer<SsaoParams>,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SsaoInputBindGroup"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(gbuffer.position.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(gbuffer.normal.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(noise_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params.binding(),
                },
            ],
        })
    }

    fn create_blur_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        raw: &ColorTarget,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SsaoBlurBindGroup"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(raw.view()),
            }],
        })
    }

    pub fn resize(&mut self, context: &RenderContext, gbuffer: &GBuffer) -> RenderResult<()> {
        let (raw, blurred) = Self::create_targets(context)?;
        let old_raw = std::mem::replace(&mut self.raw, raw);
        let old_blurred = std::mem::replace(&mut self.blurred, blurred);
        old_raw.release();
        old_blurred.release();

        let device = &context.device;
        self.input_bind_group =
            Self::create_input_bind_group(device, &self.input_layout, gbuffer, &self.noise_view, &self.params);
        self.blur_bind_group = Self::create_blur_bind_group(device, &self.blur_layout, &self.raw);
        Ok(())
    }

    /// Blurred occlusion, read by the lighting resolve.
    pub fn output_view(&self) -> &wgpu::TextureView {
        self.blurred.view()
    }

    pub fn execute(&self, encoder: &mut wgpu::CommandEncoder, frame_bind_group: &wgpu::BindGroup) {
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("SsaoPass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: self.raw.view(),
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, frame_bind_group, &[]);
            pass.set_bind_group(1, &self.input_bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("SsaoBlurPass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: self.blurred.view(),
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.blur_pipeline);
        pass.set_bind_group(0, &self.blur_bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    pub fn release(self) {
        self.raw.release();
        self.blurred.release();
        self.noise.destroy();
        self.params.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<SsaoParams>(), 64 * 16 + 16);
    }

    #[test]
    fn kernel_lies_in_unit_hemisphere() {
        let kernel = generate_kernel(32, 7);
        assert_eq!(kernel.len(), 32);
        for sample in kernel {
            assert!(sample.z >= 0.0);
            assert!(sample.length() <= 1.0 + 1e-5);
        }
    }

    #[test]
    fn kernel_is_reproducible_and_capped() {
        assert_eq!(generate_kernel(16, 3), generate_kernel(16, 3));
        assert_eq!(generate_kernel(MAX_SSAO_KERNEL + 10, 3).len(), MAX_SSAO_KERNEL as usize);
    }

    #[test]
    fn noise_rotates_in_tangent_plane() {
        let noise = generate_noise(1);
        assert_eq!(noise.len(), 16);
        assert!(noise.iter().all(|n| n[2] == 0.0 && n[3] == 0.0));
    }

    #[test]
    fn params_carry_settings() {
        let settings = SsaoSettings {
            kernel_size: 8,
            ..SsaoSettings::default()
        };
        let params = SsaoParams::new(&settings);
        assert_eq!(params.params[2], 8.0);
        assert_eq!(params.params[3], NOISE_TEXTURE_SIZE as f32);
        assert_eq!(params.kernel[8], [0.0; 4]);
    }
}
