//! Configuration types for voice synthesis.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// HuggingFace repository the ONNX export is downloaded from by default.
///
/// This is the full (non-Turbo) Chatterbox export, whose embedding graph takes
/// an `exaggeration` input.
pub const DEFAULT_MODEL_REPO: &str = "onnx-community/chatterbox-ONNX";

/// Environment variable selecting the model precision.
pub const ENV_DTYPE: &str = "VOICE_SYNTH_DTYPE";
/// Environment variable overriding the model repository.
pub const ENV_MODEL_REPO: &str = "VOICE_SYNTH_MODEL_REPO";
/// Environment variable overriding the download cache directory.
pub const ENV_CACHE_DIR: &str = "VOICE_SYNTH_CACHE_DIR";

/// Execution device for inference.
///
/// Displays as the short identifier used on the command line and in logs:
/// `cuda`, `mps` or `cpu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// NVIDIA GPU through the CUDA execution provider (requires `cuda` feature)
    Cuda,
    /// Apple silicon accelerator through the CoreML execution provider (requires `coreml` feature)
    Mps,
    /// CPU-only inference (always available)
    #[default]
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Mps => "mps",
            Device::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model quantization/precision level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelDtype {
    /// Full 32-bit float precision
    Fp32,
    /// Half 16-bit float precision (recommended for GPU)
    #[default]
    Fp16,
    /// 8-bit integer quantization
    Q8,
}

impl ModelDtype {
    /// Returns the filename suffix for this dtype.
    pub fn suffix(&self) -> &'static str {
        match self {
            ModelDtype::Fp32 => "",
            ModelDtype::Fp16 => "_fp16",
            ModelDtype::Q8 => "_quantized",
        }
    }
}

impl FromStr for ModelDtype {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fp32" => Ok(ModelDtype::Fp32),
            "fp16" => Ok(ModelDtype::Fp16),
            "q8" => Ok(ModelDtype::Q8),
            other => Err(Error::Config(format!(
                "unknown dtype '{}', expected fp32, fp16 or q8",
                other
            ))),
        }
    }
}

/// Options for text-to-speech generation.
///
/// `exaggeration` and `cfg_weight` reach the model exactly as given; no range
/// is enforced here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Emotional intensity of the cloned voice. Default: 0.5
    pub exaggeration: f32,
    /// Classifier-free guidance scale; 0 disables the unconditioned pass. Default: 0.5
    pub cfg_weight: f32,
    /// Repetition penalty. Default: 1.2
    pub repetition_penalty: f32,
    /// Maximum tokens to generate. Default: 1024
    pub max_tokens: usize,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            exaggeration: 0.5,
            cfg_weight: 0.5,
            repetition_penalty: 1.2,
            max_tokens: 1024,
        }
    }
}

/// Configuration for ChatterboxTTS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Execution device
    pub device: Device,
    /// Model precision/quantization
    pub dtype: ModelDtype,
    /// HuggingFace repository holding the ONNX export
    pub model_repo: String,
    /// Directory to cache downloaded models (None = HF cache default)
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: Device::default(),
            dtype: ModelDtype::default(),
            model_repo: DEFAULT_MODEL_REPO.to_string(),
            cache_dir: None,
        }
    }
}

impl Config {
    /// Create a new config builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Build a config from `VOICE_SYNTH_*` environment variables.
    ///
    /// The device is left at its default; callers pick it with
    /// [`select_device`](crate::select_device) and override it.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(dtype) = lookup(ENV_DTYPE) {
            builder = builder.dtype(dtype.parse()?);
        }
        if let Some(repo) = lookup(ENV_MODEL_REPO) {
            builder = builder.model_repo(repo);
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            builder = builder.cache_dir(dir);
        }
        Ok(builder.build())
    }
}

/// Builder for Config.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    device: Option<Device>,
    dtype: Option<ModelDtype>,
    model_repo: Option<String>,
    cache_dir: Option<PathBuf>,
}

impl ConfigBuilder {
    /// Set the execution device.
    pub fn device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Set the model dtype.
    pub fn dtype(mut self, dtype: ModelDtype) -> Self {
        self.dtype = Some(dtype);
        self
    }

    /// Set the HuggingFace model repository.
    pub fn model_repo(mut self, repo: impl Into<String>) -> Self {
        self.model_repo = Some(repo.into());
        self
    }

    /// Set the model cache directory.
    pub fn cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Build the config.
    pub fn build(self) -> Config {
        Config {
            device: self.device.unwrap_or_default(),
            dtype: self.dtype.unwrap_or_default(),
            model_repo: self
                .model_repo
                .unwrap_or_else(|| DEFAULT_MODEL_REPO.to_string()),
            cache_dir: self.cache_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_device_names() {
        assert_eq!(Device::Cuda.to_string(), "cuda");
        assert_eq!(Device::Mps.to_string(), "mps");
        assert_eq!(Device::Cpu.to_string(), "cpu");
    }

    #[test]
    fn test_generate_defaults() {
        let opts = GenerateOptions::default();
        assert_eq!(opts.exaggeration, 0.5);
        assert_eq!(opts.cfg_weight, 0.5);
        assert_eq!(opts.max_tokens, 1024);
    }

    #[test]
    fn test_builder_defaults() {
        let config = Config::builder().build();
        assert_eq!(config.device, Device::Cpu);
        assert_eq!(config.dtype, ModelDtype::Fp16);
        assert_eq!(config.model_repo, DEFAULT_MODEL_REPO);
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (ENV_DTYPE, "q8"),
            (ENV_MODEL_REPO, "someone/chatterbox-ONNX"),
            (ENV_CACHE_DIR, "/tmp/models"),
        ]
        .into_iter()
        .collect();

        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.dtype, ModelDtype::Q8);
        assert_eq!(config.model_repo, "someone/chatterbox-ONNX");
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/models")));
    }

    #[test]
    fn test_from_lookup_rejects_bad_dtype() {
        let err = Config::from_lookup(|k| (k == ENV_DTYPE).then(|| "int4".to_string()));
        assert!(matches!(err, Err(Error::Config(_))));
    }
}
