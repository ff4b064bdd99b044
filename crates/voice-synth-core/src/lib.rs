//! # Voice Synth Core
//!
//! Chatterbox text-to-speech on ONNX Runtime, driven by a reference voice
//! sample and two conditioning controls.
//!
//! ## Features
//!
//! - **Zero-shot voice cloning** from 5+ second audio samples
//! - **Exaggeration and CFG weight** controls passed straight to the model
//! - **Device selection** with CUDA, then Apple CoreML, then CPU (feature-gated)
//! - **Multiple quantization levels** (FP32, FP16, Q8)
//! - **Voice caching** for repeated inference with same voice
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voice_synth_core::{audio::write_wav, select_device, ChatterboxTTS, GenerateOptions, OrtProbe};
//!
//! # fn main() -> voice_synth_core::Result<()> {
//! let device = select_device(&OrtProbe)?;
//! let mut tts = ChatterboxTTS::from_pretrained(device)?;
//!
//! let opts = GenerateOptions {
//!     exaggeration: 0.7,
//!     cfg_weight: 0.3,
//!     ..Default::default()
//! };
//! let wav = tts.generate_with_reference("Hello world!", "narrator.wav", opts)?;
//! write_wav("hello.wav", &wav, tts.sample_rate())?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod inference;
pub mod models;
pub mod runtime;
pub mod voices;

// Re-exports for convenience
pub use config::{Config, ConfigBuilder, Device, GenerateOptions, ModelDtype};
pub use device::{select_device, DeviceProbe, OrtProbe};
pub use error::{Error, Result};
pub use inference::ChatterboxTTS;
pub use voices::VoiceCache;
