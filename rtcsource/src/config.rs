//! Configuration types and defaults

use rtcsource_core::RuntimeConfig;
use rtcsource_media::{MediaResult, VideoSourceConfig};
use serde::{Deserialize, Serialize};

/// Global rtcsource configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Runtime context settings
    pub runtime: RuntimeConfig,
    /// Defaults for every video source created through [`RtcSource`](crate::RtcSource)
    pub video: VideoSourceConfig,
}

impl GlobalConfig {
    /// Small footprint for embedded capture devices
    pub fn embedded() -> Self {
        Self::from_runtime(RuntimeConfig::embedded())
    }

    /// Desktop defaults
    pub fn desktop() -> Self {
        Self::from_runtime(RuntimeConfig::desktop())
    }

    fn from_runtime(runtime: RuntimeConfig) -> Self {
        Self {
            video: VideoSourceConfig::from_runtime(&runtime),
            runtime,
        }
    }

    /// Enable logging with the given `EnvFilter` directive
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.runtime = self.runtime.with_log_filter(filter);
        self
    }

    /// Validate both halves
    pub fn validate(&self) -> MediaResult<()> {
        self.runtime.validate()?;
        self.video.validate()
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self::desktop()
    }
}
