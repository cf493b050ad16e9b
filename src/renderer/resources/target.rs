use crate::error::{GraphicsErrorCode, RenderError};
use crate::renderer::context::RenderContext;

/// A single 2D render target that later passes sample.
pub struct ColorTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl ColorTarget {
    pub fn new(
        context: &RenderContext,
        label: &str,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::graphics(
                GraphicsErrorCode::FramebufferIncomplete,
                format!("{label} requested at {width}x{height}"),
            ));
        }

        let texture = context.scoped(GraphicsErrorCode::FramebufferIncomplete, label, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self { texture, view })
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn release(self) {
        self.texture.destroy();
    }
}

pub struct DepthStencilTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl DepthStencilTarget {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

    pub fn new(context: &RenderContext, width: u32, height: u32) -> Result<Self, RenderError> {
        let texture = context.scoped(
            GraphicsErrorCode::FramebufferIncomplete,
            "GBufferDepthStencil",
            |device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("GBufferDepthStencil"),
                    size: wgpu::Extent3d {
                        width: width.max(1),
                        height: height.max(1),
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: Self::FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    view_formats: &[],
                })
            },
        )?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self { texture, view })
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn release(self) {
        self.texture.destroy();
    }
}

/// Multi-target framebuffer written by the geometry pass.
pub struct GBuffer {
    /// World position, `w = 1` for geometry and `0` for sky.
    pub position: ColorTarget,
    pub normal: ColorTarget,
    /// rgb albedo (or sky colour), a roughness.
    pub albedo: ColorTarget,
    pub depth_stencil: DepthStencilTarget,
}

impl GBuffer {
    pub const POSITION_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
    pub const NORMAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
    pub const ALBEDO_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    pub const FORMATS: [wgpu::TextureFormat; 3] = [
        Self::POSITION_FORMAT,
        Self::NORMAL_FORMAT,
        Self::ALBEDO_FORMAT,
    ];

    pub fn new(context: &RenderContext, width: u32, height: u32) -> Result<Self, RenderError> {
        Ok(Self {
            position: ColorTarget::new(context, "GBufferPosition", Self::POSITION_FORMAT, width, height)?,
            normal: ColorTarget::new(context, "GBufferNormal", Self::NORMAL_FORMAT, width, height)?,
            albedo: ColorTarget::new(context, "GBufferAlbedo", Self::ALBEDO_FORMAT, width, height)?,
            depth_stencil: DepthStencilTarget::new(context, width, height)?,
        })
    }

    pub fn color_attachments(&self) -> [Option<wgpu::RenderPassColorAttachment<'_>>; 3] {
        [&self.position, &self.normal, &self.albedo].map(|target| {
            Some(wgpu::RenderPassColorAttachment {
                view: target.view(),
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })
        })
    }

    pub fn release(self) {
        self.position.release();
        self.normal.release();
        self.albedo.release();
        self.depth_stencil.release();
    }
}
