//! Configuration for the compositor.
//!
//! `CompositorConfig` can be built in code or deserialized from JSON. Every
//! field has a default, so a partial document (or `{}`) is a valid config.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{RenderError, RenderResult};

/// Flags that select faster paths in the region tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Optimizations {
    /// Accumulate quantized values directly when every layer is a pure primary.
    pub primary_color_fast_path: bool,
    /// Ignore the alpha byte of channel colors during composition.
    pub alpha_less: bool,
}

impl Default for Optimizations {
    fn default() -> Self {
        Self {
            primary_color_fast_path: true,
            alpha_less: true,
        }
    }
}

/// Top-level compositor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Upper bound on the number of region tasks per render.
    pub max_tasks: usize,
    pub optimizations: Optimizations,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            max_tasks: num_cpus::get().max(1),
            optimizations: Optimizations::default(),
        }
    }
}

impl CompositorConfig {
    /// Parses a JSON document, filling missing fields with defaults.
    pub fn from_json_str(json: &str) -> RenderResult<Self> {
        let config: CompositorConfig =
            serde_json::from_str(json).map_err(|e| RenderError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &Path) -> RenderResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RenderError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> RenderResult<()> {
        if self.max_tasks == 0 {
            return Err(RenderError::Config("max_tasks must be positive".to_string()));
        }
        Ok(())
    }
}
