//! Engine configuration: JSON file, environment overrides, validation.

use crate::error::{GemmError, Result};
use crate::kernel::BlockSizes;
use serde::Deserialize;
use std::path::Path;

pub const ENV_BACKEND: &str = "MPGEMM_BACKEND";
pub const ENV_THREADS: &str = "MPGEMM_THREADS";
pub const ENV_FORCE_SCALAR: &str = "MPGEMM_FORCE_SCALAR";

/// Engine settings. Missing JSON fields take their defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// `naive`, `lut`, or `blas` (alias `mkl`).
    pub backend: String,
    /// Worker threads; 0 = one per allowed CPU.
    pub threads: usize,
    pub pin_threads: bool,
    /// Skip the AVX2 gather even when the CPU has it.
    pub force_scalar: bool,
    /// Step between adjacent signed activation codes in the LUT backend.
    pub activation_scale: f32,
    pub block_rows: usize,
    pub block_cols: usize,
    pub block_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let blocks = BlockSizes::default();
        EngineConfig {
            backend: "lut".to_string(),
            threads: 0,
            pin_threads: false,
            force_scalar: false,
            activation_scale: 1.0,
            block_rows: blocks.rows,
            block_cols: blocks.cols,
            block_depth: blocks.depth,
        }
    }
}

impl EngineConfig {
    /// Defaults with the given backend name.
    pub fn with_backend(backend: &str) -> Self {
        EngineConfig {
            backend: backend.to_string(),
            ..Default::default()
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&s)?;
        log::info!("Loaded engine config from {}: {config:?}", path.display());
        Ok(config)
    }

    /// Apply `MPGEMM_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key → value source.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(backend) = lookup(ENV_BACKEND) {
            log::debug!("{ENV_BACKEND} override: {backend}");
            self.backend = backend;
        }
        if let Some(threads) = lookup(ENV_THREADS) {
            self.threads = threads.trim().parse().map_err(|e| {
                GemmError::Configuration(format!("{ENV_THREADS}='{threads}': {e}"))
            })?;
        }
        if let Some(flag) = lookup(ENV_FORCE_SCALAR) {
            self.force_scalar = match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    return Err(GemmError::Configuration(format!(
                        "{ENV_FORCE_SCALAR}='{other}' is not a boolean"
                    )))
                }
            };
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.activation_scale.is_finite() || self.activation_scale <= 0.0 {
            return Err(GemmError::Configuration(format!(
                "activation_scale must be finite and > 0, got {}",
                self.activation_scale
            )));
        }
        self.block_sizes().validate()
    }

    pub fn block_sizes(&self) -> BlockSizes {
        BlockSizes {
            rows: self.block_rows,
            cols: self.block_cols,
            depth: self.block_depth,
        }
    }
}
