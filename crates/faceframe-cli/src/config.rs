use anyhow::{Context, Result};
use faceframe::SurfaceConfig;
use faceframe_core::SCRFD_MODEL_FILE;
use faceframe_hw::V4lDevice;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// CLI configuration: optional TOML file, then `FACEFRAME_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device of the user-facing camera (default: /dev/video0).
    pub camera_device: String,
    /// V4L2 device of the rear camera; falls back to `camera_device`.
    pub rear_camera_device: Option<String>,
    /// Directory containing `det_10g.onnx`.
    pub model_dir: PathBuf,
    /// Engine settings, the `[surface]` table.
    pub surface: SurfaceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            rear_camera_device: None,
            model_dir: default_model_dir(),
            surface: SurfaceConfig::default(),
        }
    }
}

impl Config {
    /// Load `$FACEFRAME_CONFIG`, else `$XDG_CONFIG_HOME/faceframe/config.toml`
    /// if present, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("FACEFRAME_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => {
                let path = config_home().join("faceframe/config.toml");
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `FACEFRAME_*` overrides. Unparseable values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(device) = var("FACEFRAME_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        if let Some(device) = var("FACEFRAME_REAR_CAMERA_DEVICE") {
            self.rear_camera_device = Some(device);
        }
        if let Some(dir) = var("FACEFRAME_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(ms) = env_parse(&var, "FACEFRAME_FRAME_INTERVAL_MS") {
            self.surface.frame_interval_ms = ms;
        }
        if let Some(quality) = env_parse(&var, "FACEFRAME_JPEG_QUALITY") {
            self.surface.jpeg_quality = quality;
        }
    }

    /// Path to the SCRFD detection model.
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(SCRFD_MODEL_FILE)
    }

    pub fn device(&self) -> V4lDevice {
        let device = V4lDevice::new(self.camera_device.clone());
        match &self.rear_camera_device {
            Some(rear) => device.with_environment(rear.clone()),
            None => device,
        }
    }
}

fn env_parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let value = var(key)?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %value, "ignoring unparseable environment override");
            None
        }
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("faceframe/models")
}
