use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::render::{
    DEFAULT_CACHE_LIMIT_BYTES, DEFAULT_DEQUEUE_DELAY, DEFAULT_PIXEL_RATIO, EvictionPolicy,
};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Tunables of the page provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Byte budget of the render cache
    #[serde(default = "default_cache_limit")]
    pub cache_limit_bytes: usize,

    /// Debounce before an idle provider starts rendering, in milliseconds
    #[serde(default = "default_dequeue_delay_ms")]
    pub dequeue_delay_ms: u64,

    /// Device pixels per point
    #[serde(default = "default_pixel_ratio")]
    pub pixel_ratio: f64,

    #[serde(default)]
    pub eviction: EvictionPolicy,
}

fn default_cache_limit() -> usize {
    DEFAULT_CACHE_LIMIT_BYTES
}

fn default_dequeue_delay_ms() -> u64 {
    DEFAULT_DEQUEUE_DELAY.as_millis() as u64
}

fn default_pixel_ratio() -> f64 {
    DEFAULT_PIXEL_RATIO
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            cache_limit_bytes: default_cache_limit(),
            dequeue_delay_ms: default_dequeue_delay_ms(),
            pixel_ratio: default_pixel_ratio(),
            eviction: EvictionPolicy::default(),
        }
    }
}

impl RenderSettings {
    /// Parse settings from a YAML document; missing keys take defaults
    pub fn from_yaml(content: &str) -> Result<Self, SettingsError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        debug!("Loading render settings from {}", path.display());
        let content = fs::read_to_string(path)?;
        let settings = Self::from_yaml(&content)?;
        info!("Loaded render settings from {}", path.display());
        Ok(settings)
    }

    pub fn to_yaml(&self) -> Result<String, SettingsError> {
        Ok(serde_yaml::to_string(self)?)
    }

    #[must_use]
    pub fn dequeue_delay(&self) -> Duration {
        Duration::from_millis(self.dequeue_delay_ms)
    }
}
