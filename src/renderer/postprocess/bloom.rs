use crate::error::{RenderError, RenderResult, ResultExt};
use crate::renderer::context::RenderContext;
use crate::renderer::resources::ColorTarget;

pub const BLOOM_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Sizes of the chain: level 0 is half resolution, each level halves again.
/// Stops early rather than producing levels smaller than one texel.
pub fn mip_sizes(width: u32, height: u32, mip_count: u32) -> Vec<(u32, u32)> {
    let mut sizes = Vec::with_capacity(mip_count as usize);
    let (mut w, mut h) = ((width / 2).max(1), (height / 2).max(1));
    for _ in 0..mip_count.max(1) {
        sizes.push((w, h));
        if w == 1 && h == 1 {
            break;
        }
        w = (w / 2).max(1);
        h = (h / 2).max(1);
    }
    sizes
}

struct ChainPass {
    target: usize,
    upsample: bool,
    bind_group: wgpu::BindGroup,
}

/// Downsample/upsample mip chain. `down[0]` holds the thresholded scene at
/// half resolution; `up[i]` adds the blurred lower level onto `down[i]`.
pub struct BloomChain {
    down: Vec<ColorTarget>,
    up: Vec<ColorTarget>,
    prefilter_bind_group: wgpu::BindGroup,
    passes: Vec<ChainPass>,
}

impl BloomChain {
    pub fn new(
        context: &RenderContext,
        layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        params: &wgpu::Buffer,
        hdr: &wgpu::TextureView,
        mip_count: u32,
    ) -> RenderResult<Self> {
        let sizes = mip_sizes(context.width(), context.height(), mip_count);
        if sizes.len() < mip_count as usize {
            log::warn!(
                "Bloom chain limited to {} of {} mips at {}x{}",
                sizes.len(),
                mip_count,
                context.width(),
                context.height()
            );
        }

        let mut down = Vec::with_capacity(sizes.len());
        let mut up = Vec::with_capacity(sizes.len());
        for (level, &(width, height)) in sizes.iter().enumerate() {
            down.push(
                ColorTarget::new(context, &format!("BloomDown{level}"), BLOOM_FORMAT, width, height)
                    .with_context(|| RenderError::general(format!("allocating bloom mip {level}")))?,
            );
            // The last level is never an upsample target.
            if level + 1 < sizes.len() {
                up.push(
                    ColorTarget::new(context, &format!("BloomUp{level}"), BLOOM_FORMAT, width, height)
                        .with_context(|| RenderError::general(format!("allocating bloom mip {level}")))?,
                );
            }
        }

        let device = &context.device;
        let bind = |label: &str, a: &wgpu::TextureView, b: &wgpu::TextureView| {
            post_bind_group(device, label, layout, a, b, sampler, params)
        };

        let prefilter_bind_group = bind("BloomPrefilterBindGroup", hdr, hdr);
        let mut passes = Vec::new();
        for level in 1..down.len() {
            passes.push(ChainPass {
                target: level,
                upsample: false,
                bind_group: bind("BloomDownsampleBindGroup", down[level - 1].view(), down[level - 1].view()),
            });
        }
        for level in (0..up.len()).rev() {
            let low = if level + 1 < up.len() {
                up[level + 1].view()
            } else {
                down[level + 1].view()
            };
            passes.push(ChainPass {
                target: level,
                upsample: true,
                bind_group: bind("BloomUpsampleBindGroup", low, down[level].view()),
            });
        }

        log::info!("Bloom chain: {:?}", sizes);

        Ok(Self {
            down,
            up,
            prefilter_bind_group,
            passes,
        })
    }

    /// Final accumulated bloom, composited onto the scene.
    pub fn output_view(&self) -> &wgpu::TextureView {
        match self.up.first() {
            Some(up) => up.view(),
            None => self.down[0].view(),
        }
    }

    pub fn execute(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        prefilter: &wgpu::RenderPipeline,
        downsample: &wgpu::RenderPipeline,
        upsample: &wgpu::RenderPipeline,
    ) {
        fullscreen_pass(
            encoder,
            "BloomPrefilter",
            self.down[0].view(),
            prefilter,
            &self.prefilter_bind_group,
        );
        for pass in &self.passes {
            let (label, view, pipeline) = if pass.upsample {
                ("BloomUpsample", self.up[pass.target].view(), upsample)
            } else {
                ("BloomDownsample", self.down[pass.target].view(), downsample)
            };
            fullscreen_pass(encoder, label, view, pipeline, &pass.bind_group);
        }
    }

    pub fn release(self) {
        for target in self.down.into_iter().chain(self.up) {
            target.release();
        }
    }
}

pub(super) fn post_bind_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    tex_a: &wgpu::TextureView,
    tex_b: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
    params: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(tex_a),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(tex_b),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: params.as_entire_binding(),
            },
        ],
    })
}

pub(super) fn fullscreen_pass(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    target: &wgpu::TextureView,
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
            resolve_target: None,
            depth_slice: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.draw(0..3, 0..1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_halves_from_half_resolution() {
        assert_eq!(
            mip_sizes(1280, 720, 5),
            vec![(640, 360), (320, 180), (160, 90), (80, 45), (40, 22)]
        );
    }

    #[test]
    fn chain_stops_at_one_texel() {
        let sizes = mip_sizes(4, 4, 8);
        assert_eq!(sizes, vec![(2, 2), (1, 1)]);
    }

    #[test]
    fn single_mip_is_allowed() {
        assert_eq!(mip_sizes(100, 50, 1), vec![(50, 25)]);
    }
}
