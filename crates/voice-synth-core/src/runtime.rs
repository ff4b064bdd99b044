//! Process-wide ONNX Runtime environment.

use crate::{Error, Result};
use std::sync::OnceLock;

/// Name the ORT environment is registered under.
pub const ENVIRONMENT_NAME: &str = "voice-synth";

static RUNTIME: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Initialise the ONNX Runtime environment.
///
/// Runs once per process; later calls return the first outcome. A failure
/// here means the runtime library itself is missing or unusable and is
/// reported as [`Error::Runtime`].
pub fn init() -> Result<()> {
    RUNTIME
        .get_or_init(|| {
            tracing::debug!("Initialising ONNX Runtime environment");
            ort::init()
                .with_name(ENVIRONMENT_NAME)
                .commit()
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .clone()
        .map_err(Error::Runtime)
}
