use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult, ResultExt};

/// Upper bound on each cluster grid axis; the light lists are sized from it.
pub const MAX_CLUSTER_AXIS: u32 = 64;
pub const MAX_SSAO_KERNEL: u32 = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderSettings {
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub present_mode: PresentModeSetting,
    #[serde(default)]
    pub cluster: ClusterSettings,
    #[serde(default)]
    pub shadows: ShadowSettings,
    #[serde(default)]
    pub bloom: BloomSettings,
    #[serde(default)]
    pub ssao: SsaoSettings,
    #[serde(default)]
    pub tonemap: TonemapSettings,
    #[serde(default)]
    pub sky: SkySettings,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            present_mode: PresentModeSetting::default(),
            cluster: ClusterSettings::default(),
            shadows: ShadowSettings::default(),
            bloom: BloomSettings::default(),
            ssao: SsaoSettings::default(),
            tonemap: TonemapSettings::default(),
            sky: SkySettings::default(),
        }
    }
}

impl RenderSettings {
    pub fn load() -> RenderResult<Self> {
        Self::load_from_path("settings.json")
    }

    /// A missing or unparsable file falls back to defaults; values that would
    /// leave the pipeline degenerate are rejected.
    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> RenderResult<Self> {
        use std::fs;

        let path = path.as_ref();
        let settings = match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RenderSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded render settings from {:?}", path);
                    settings
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default render settings.",
                        path, err
                    );
                    RenderSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Render settings file {:?} not found. Using default settings.",
                    path
                );
                RenderSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }
        };

        settings
            .validate()
            .with_context(|| RenderError::general(format!("validating settings from {:?}", path)))
    }

    pub fn validate(self) -> RenderResult<Self> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(RenderError::logic(format!(
                "resolution {}x{} has a zero dimension",
                self.resolution.width, self.resolution.height
            ))
            .into());
        }

        let [x, y, z] = self.cluster.dims;
        if x == 0 || y == 0 || z == 0 {
            return Err(RenderError::logic(format!("cluster grid {x}x{y}x{z} is degenerate")).into());
        }
        if x > MAX_CLUSTER_AXIS || y > MAX_CLUSTER_AXIS || z > MAX_CLUSTER_AXIS {
            return Err(RenderError::logic(format!(
                "cluster grid {x}x{y}x{z} exceeds {MAX_CLUSTER_AXIS} cells per axis"
            ))
            .into());
        }
        if self.cluster.max_lights_per_cluster == 0 {
            return Err(RenderError::logic("max_lights_per_cluster must be at least 1").into());
        }

        if self.shadows.cascade_resolution == 0 || self.shadows.point_resolution == 0 {
            return Err(RenderError::logic("shadow map resolution must be non-zero").into());
        }
        let [first, second] = self.shadows.cascade_splits;
        if !(first > 0.0 && second > first) {
            return Err(RenderError::logic(format!(
                "cascade splits [{first}, {second}] must be positive and ascending"
            ))
            .into());
        }

        if self.ssao.kernel_size == 0 || self.ssao.kernel_size > MAX_SSAO_KERNEL {
            return Err(RenderError::logic(format!(
                "ssao kernel size {} outside 1..={MAX_SSAO_KERNEL}",
                self.ssao.kernel_size
            ))
            .into());
        }

        if self.bloom.mip_count == 0 {
            return Err(RenderError::logic("bloom needs at least one mip").into());
        }

        Ok(self)
    }

    pub fn present_mode(&self, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
        let desired = self.present_mode.to_wgpu();
        if available.contains(&desired) {
            return desired;
        }

        warn!(
            "Requested present mode {:?} is not supported. Falling back to FIFO.",
            desired
        );

        if available.contains(&wgpu::PresentMode::Fifo) {
            wgpu::PresentMode::Fifo
        } else {
            available
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterSettings {
    pub dims: [u32; 3],
    pub max_lights_per_cluster: u32,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            dims: [16, 9, 24],
            max_lights_per_cluster: 128,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShadowSettings {
    pub cascade_resolution: u32,
    pub point_resolution: u32,
    /// View-space distances separating the three cascades.
    pub cascade_splits: [f32; 2],
    /// Render transparent entities into the shadow maps as well.
    pub transparent_casters: bool,
    pub depth_bias_constant: i32,
    pub depth_bias_slope: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            cascade_resolution: 2048,
            point_resolution: 1024,
            cascade_splits: [10.0, 30.0],
            transparent_casters: false,
            depth_bias_constant: 2,
            depth_bias_slope: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BloomSettings {
    pub enabled: bool,
    pub mip_count: u32,
    pub threshold: f32,
    pub knee: f32,
    pub strength: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mip_count: 5,
            threshold: 1.0,
            knee: 0.5,
            strength: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SsaoSettings {
    pub enabled: bool,
    pub kernel_size: u32,
    pub radius: f32,
    pub bias: f32,
}

impl Default for SsaoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            kernel_size: 32,
            radius: 0.5,
            bias: 0.025,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TonemapSettings {
    pub exposure: f32,
    pub gamma: f32,
}

impl Default for TonemapSettings {
    fn default() -> Self {
        Self {
            exposure: 1.0,
            gamma: 2.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SkySettings {
    pub zenith: [f32; 3],
    pub horizon: [f32; 3],
    /// Optional equirectangular texture replacing the gradient.
    pub texture: Option<PathBuf>,
}

impl Default for SkySettings {
    fn default() -> Self {
        Self {
            zenith: [0.18, 0.32, 0.62],
            horizon: [0.62, 0.7, 0.78],
            texture: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeSetting {
    #[default]
    Fifo,
    FifoRelaxed,
    Immediate,
    Mailbox,
    AutoVsync,
    AutoNoVsync,
}

impl PresentModeSetting {
    fn to_wgpu(&self) -> wgpu::PresentMode {
        match self {
            PresentModeSetting::Fifo => wgpu::PresentMode::Fifo,
            PresentModeSetting::FifoRelaxed => wgpu::PresentMode::FifoRelaxed,
            PresentModeSetting::Immediate => wgpu::PresentMode::Immediate,
            PresentModeSetting::Mailbox => wgpu::PresentMode::Mailbox,
            PresentModeSetting::AutoVsync => wgpu::PresentMode::AutoVsync,
            PresentModeSetting::AutoNoVsync => wgpu::PresentMode::AutoNoVsync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;

    #[test]
    fn defaults_are_valid() {
        let settings = RenderSettings::default().validate().unwrap();
        assert_eq!(settings.cluster.dims, [16, 9, 24]);
        assert_eq!(settings.shadows.cascade_splits, [10.0, 30.0]);
    }

    #[test]
    fn degenerate_grid_is_fatal() {
        let mut settings = RenderSettings::default();
        settings.cluster.dims = [16, 0, 24];
        let err = settings.validate().unwrap_err();
        assert!(matches!(err.root(), RenderError::CoreLogic(_)));
    }

    #[test]
    fn descending_splits_are_rejected() {
        let mut settings = RenderSettings::default();
        settings.shadows.cascade_splits = [30.0, 10.0];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn oversized_kernel_is_rejected() {
        let mut settings = RenderSettings::default();
        settings.ssao.kernel_size = MAX_SSAO_KERNEL + 1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{ "cluster": { "dims": [8, 8, 16] }, "bloom": { "enabled": false } }"#;
        let settings: RenderSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.cluster.dims, [8, 8, 16]);
        assert_eq!(settings.cluster.max_lights_per_cluster, 128);
        assert!(!settings.bloom.enabled);
        assert_eq!(settings.bloom.mip_count, 5);
        assert!(settings.ssao.enabled);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let settings = RenderSettings::load_from_path("no/such/settings.json").unwrap();
        assert_eq!(settings, RenderSettings::default());
    }

    #[test]
    fn invalid_file_reports_stack() {
        let path = std::env::temp_dir().join(format!(
            "clustered_deferred_settings_{}.json",
            std::process::id()
        ));
        std::fs::write(&path, r#"{ "resolution": { "width": 0, "height": 720 } }"#).unwrap();

        let err = RenderSettings::load_from_path(&path).unwrap_err();
        assert_eq!(err.len(), 2);
        assert!(matches!(err.root(), RenderError::CoreLogic(_)));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn present_mode_returns_desired_when_available() {
        let settings = RenderSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        let available = [
            wgpu::PresentMode::Fifo,
            wgpu::PresentMode::Mailbox,
            wgpu::PresentMode::Immediate,
        ];

        assert_eq!(
            settings.present_mode(&available),
            wgpu::PresentMode::Mailbox
        );
    }

    #[test]
    fn present_mode_falls_back_to_fifo_when_desired_missing() {
        let settings = RenderSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        let available = [wgpu::PresentMode::Fifo, wgpu::PresentMode::Immediate];

        assert_eq!(settings.present_mode(&available), wgpu::PresentMode::Fifo);
    }
}
