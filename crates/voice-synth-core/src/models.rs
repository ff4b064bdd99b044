//! Model downloading and ONNX session management with lazy loading.

use crate::config::{Config, Device, ModelDtype};
use crate::{Error, Result};
use hf_hub::api::sync::{Api, ApiBuilder};
use hf_hub::{Repo, RepoType};
use ort::session::builder::SessionBuilder;
use ort::session::Session;
use std::path::{Path, PathBuf};

#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

#[cfg(feature = "coreml")]
use ort::execution_providers::CoreMLExecutionProvider;

/// Paths to downloaded ONNX model files.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub speech_encoder: PathBuf,
    pub embed_tokens: PathBuf,
    pub language_model: PathBuf,
    pub conditional_decoder: PathBuf,
    pub tokenizer: PathBuf,
}

/// ONNX file name for a model component at the given precision.
pub fn onnx_filename(component: &str, dtype: ModelDtype) -> String {
    format!("{}{}.onnx", component, dtype.suffix())
}

fn hub_api(cache_dir: Option<&Path>) -> Result<Api> {
    let api = match cache_dir {
        Some(dir) => ApiBuilder::new().with_cache_dir(dir.to_path_buf()).build(),
        None => Api::new(),
    };
    api.map_err(|e| Error::Model(format!("Failed to create HF API: {}", e)))
}

/// Download models from HuggingFace Hub.
///
/// Models are cached locally after first download.
pub fn download_models(config: &Config) -> Result<ModelPaths> {
    let api = hub_api(config.cache_dir.as_deref())?;
    let repo = api.repo(Repo::new(config.model_repo.clone(), RepoType::Model));

    let get_model = |name: &str| -> Result<PathBuf> {
        let filename = onnx_filename(name, config.dtype);
        tracing::info!(repo = %config.model_repo, file = %filename, "Fetching model");

        let model_path = repo
            .get(&format!("onnx/{}", filename))
            .map_err(|e| Error::Model(format!("Failed to download {}: {}", filename, e)))?;

        // External weights live next to the graph for the larger components only
        let data_filename = format!("onnx/{}_data", filename);
        if repo.get(&data_filename).is_err() {
            tracing::debug!(file = %data_filename, "No external weight file");
        }

        Ok(model_path)
    };

    let tokenizer = repo
        .get("tokenizer.json")
        .map_err(|e| Error::Model(format!("Failed to download tokenizer: {}", e)))?;

    Ok(ModelPaths {
        speech_encoder: get_model("speech_encoder")?,
        embed_tokens: get_model("embed_tokens")?,
        language_model: get_model("language_model")?,
        conditional_decoder: get_model("conditional_decoder")?,
        tokenizer,
    })
}

/// Attach the execution provider for `device` to a session builder.
///
/// An explicitly requested accelerator that cannot be registered is an error
/// rather than a silent CPU fallback.
fn with_device(builder: SessionBuilder, device: Device) -> Result<SessionBuilder> {
    match device {
        Device::Cpu => Ok(builder),
        #[cfg(feature = "cuda")]
        Device::Cuda => Ok(builder.with_execution_providers([CUDAExecutionProvider::default()
            .build()
            .error_on_failure()])?),
        #[cfg(feature = "coreml")]
        Device::Mps => Ok(builder.with_execution_providers([CoreMLExecutionProvider::default()
            .build()
            .error_on_failure()])?),
        #[allow(unreachable_patterns)]
        other => Err(Error::Model(format!(
            "device '{}' is not supported by this build",
            other
        ))),
    }
}

/// ONNX sessions for all model components with lazy loading support.
///
/// Sessions are loaded on-demand to reduce initial memory footprint.
/// Use the accessor methods (`speech_encoder()`, etc.) to get or load sessions.
pub struct ModelSessions {
    paths: ModelPaths,
    device: Device,
    speech_encoder: Option<Session>,
    embed_tokens: Option<Session>,
    language_model: Option<Session>,
    conditional_decoder: Option<Session>,
}

impl ModelSessions {
    /// Create a new ModelSessions container without loading any sessions.
    pub fn new(paths: ModelPaths, device: Device) -> Self {
        Self {
            paths,
            device,
            speech_encoder: None,
            embed_tokens: None,
            language_model: None,
            conditional_decoder: None,
        }
    }

    fn load(slot: &mut Option<Session>, name: &str, path: &Path, device: Device) -> Result<()> {
        if slot.is_none() {
            crate::runtime::init()?;
            tracing::debug!(component = name, %device, "Loading session");
            let builder = with_device(Session::builder()?, device)?;
            *slot = Some(builder.commit_from_file(path)?);
        }
        Ok(())
    }

    /// Get the speech encoder session, loading it if necessary.
    pub fn speech_encoder(&mut self) -> Result<&mut Session> {
        Self::load(
            &mut self.speech_encoder,
            "speech_encoder",
            &self.paths.speech_encoder,
            self.device,
        )?;
        self.speech_encoder
            .as_mut()
            .ok_or_else(|| Error::Model("speech_encoder session missing".into()))
    }

    /// Get the embed_tokens session, loading it if necessary.
    pub fn embed_tokens(&mut self) -> Result<&mut Session> {
        Self::load(
            &mut self.embed_tokens,
            "embed_tokens",
            &self.paths.embed_tokens,
            self.device,
        )?;
        self.embed_tokens
            .as_mut()
            .ok_or_else(|| Error::Model("embed_tokens session missing".into()))
    }

    /// Get the language model session, loading it if necessary.
    pub fn language_model(&mut self) -> Result<&mut Session> {
        Self::load(
            &mut self.language_model,
            "language_model",
            &self.paths.language_model,
            self.device,
        )?;
        self.language_model
            .as_mut()
            .ok_or_else(|| Error::Model("language_model session missing".into()))
    }

    /// Get the conditional decoder session, loading it if necessary.
    pub fn conditional_decoder(&mut self) -> Result<&mut Session> {
        Self::load(
            &mut self.conditional_decoder,
            "conditional_decoder",
            &self.paths.conditional_decoder,
            self.device,
        )?;
        self.conditional_decoder
            .as_mut()
            .ok_or_else(|| Error::Model("conditional_decoder session missing".into()))
    }
}
