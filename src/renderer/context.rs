use std::sync::Arc;

use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::error::{GraphicsErrorCode, RenderError, RenderResult, ResultExt};
use crate::settings::RenderSettings;

/// Device, queue and surface shared by every pass. Passed by reference; there
/// is no global renderer state.
pub struct RenderContext {
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub size: PhysicalSize<u32>,
    pub supports_depth_clip_control: bool,
}

impl RenderContext {
    pub async fn new(window: Arc<Window>, settings: &RenderSettings) -> RenderResult<Self> {
        let size = window.inner_size();
        let size = if size.width == 0 || size.height == 0 {
            PhysicalSize::new(settings.resolution.width, settings.resolution.height)
        } else {
            size
        };

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance.create_surface(window).map_err(|err| {
            RenderError::graphics(GraphicsErrorCode::SurfaceUnavailable, err.to_string())
        })?;

        log::info!("Surface created successfully!");

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| {
                RenderError::graphics(GraphicsErrorCode::AdapterUnavailable, err.to_string())
            })?;

        log::info!("Using adapter: {:?}", adapter.get_info());
        log::info!("Using backend: {:?}", adapter.get_info().backend);
        let adapter_features = adapter.features();
        log::info!("Adapter features: {:?}", adapter_features);

        let mut required_features = wgpu::Features::empty();
        let supports_depth_clip_control =
            adapter_features.contains(wgpu::Features::DEPTH_CLIP_CONTROL);
        if supports_depth_clip_control {
            required_features |= wgpu::Features::DEPTH_CLIP_CONTROL;
        } else {
            log::warn!("Depth clip control not supported; shadow casters may clip at the near plane");
        }

        if adapter_features.contains(wgpu::Features::FLOAT32_FILTERABLE) {
            required_features |= wgpu::Features::FLOAT32_FILTERABLE;
        }

        let mut limits = wgpu::Limits::default();
        limits.max_bind_groups = limits.max_bind_groups.max(4);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Device"),
                required_features,
                required_limits: limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|err| RenderError::graphics(GraphicsErrorCode::DeviceRequest, err.to_string()))
            .context(RenderError::general("requesting device"))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| {
                RenderError::graphics(
                    GraphicsErrorCode::SurfaceUnavailable,
                    "surface reports no supported formats",
                )
            })?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let present_mode = settings.present_mode(&surface_caps.present_modes);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        log::info!(
            "Surface configured: {}x{} {:?} {:?}",
            config.width,
            config.height,
            format,
            present_mode
        );

        Ok(Self {
            surface,
            device,
            queue,
            config,
            size,
            supports_depth_clip_control,
        })
    }

    /// Returns `false` for zero-sized (minimised) windows, which are ignored.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) -> bool {
        if new_size.width == 0 || new_size.height == 0 {
            return false;
        }
        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
        true
    }

    pub fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    pub fn width(&self) -> u32 {
        self.config.width
    }

    pub fn height(&self) -> u32 {
        self.config.height
    }

    /// Runs GPU object creation inside validation and out-of-memory error
    /// scopes so failures come back as values instead of device panics.
    pub fn scoped<T>(
        &self,
        code: GraphicsErrorCode,
        what: &str,
        create: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<T, RenderError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());

        match out_of_memory.or(validation) {
            Some(error) => {
                log::error!("GPU error while creating {}: {}", what, error);
                Err(RenderError::from_wgpu(error, code))
            }
            None => Ok(value),
        }
    }
}
