use crate::error::{GraphicsErrorCode, RenderError};
use crate::renderer::context::RenderContext;

/// Square depth texture array with one render view per layer and one
/// sampling view over all layers.
pub struct ShadowTarget {
    texture: wgpu::Texture,
    array_view: wgpu::TextureView,
    layer_views: Vec<wgpu::TextureView>,
}

impl ShadowTarget {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

    pub fn new(
        context: &RenderContext,
        label: &str,
        layers: u32,
        resolution: u32,
    ) -> Result<Self, RenderError> {
        let max = context.device.limits().max_texture_dimension_2d;
        if resolution == 0 || resolution > max {
            return Err(RenderError::graphics(
                GraphicsErrorCode::FramebufferIncomplete,
                format!("{label}: resolution {resolution} outside 1..={max}"),
            ));
        }
        let layers = layers.max(1);

        let texture = context.scoped(GraphicsErrorCode::FramebufferIncomplete, label, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: resolution,
                    height: resolution,
                    depth_or_array_layers: layers,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: Self::FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
        })?;

        let array_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{label}ArrayView")),
            format: Some(Self::FORMAT),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            aspect: wgpu::TextureAspect::DepthOnly,
            base_array_layer: 0,
            array_layer_count: Some(layers),
            ..Default::default()
        });

        let layer_views = (0..layers)
            .map(|layer| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(&format!("{label}Layer{layer}")),
                    format: Some(Self::FORMAT),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    aspect: wgpu::TextureAspect::DepthOnly,
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();

        log::info!("Allocated {label}: {layers} x {resolution}x{resolution}");

        Ok(Self {
            texture,
            array_view,
            layer_views,
        })
    }

    /// Render view of one layer. `layer` is below the count given to `new`:
    /// a cascade index or a cube face.
    pub fn layer_view(&self, layer: usize) -> &wgpu::TextureView {
        &self.layer_views[layer]
    }

    pub fn array_view(&self) -> &wgpu::TextureView {
        &self.array_view
    }

    pub fn release(self) {
        self.texture.destroy();
    }
}
