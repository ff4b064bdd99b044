//! Voice Synth CLI - synthesize speech in the voice of a reference clip.

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use voice_synth_core::{
    audio::write_wav, runtime, select_device, ChatterboxTTS, Config, GenerateOptions, OrtProbe,
};

/// Exit status when the inference runtime cannot be loaded.
const MISSING_DEPENDENCY: u8 = 1;

/// Install command printed when the runtime is missing.
const INSTALL_HINT: &str = "pip install chatterbox-tts torch torchaudio";

#[derive(Parser, Debug)]
#[command(name = "voice-synth")]
#[command(about = "Chatterbox TTS CLI")]
#[command(version)]
struct Cli {
    /// Text to synthesize
    #[arg(long)]
    text: String,

    /// Reference audio file path
    #[arg(long)]
    reference: PathBuf,

    /// Exaggeration level (default: 1.0)
    #[arg(long = "exageration", default_value_t = 1.0, allow_negative_numbers = true)]
    exageration: f32,

    /// CFG weight (default: 1.0)
    #[arg(long = "cfg_weight", default_value_t = 1.0, allow_negative_numbers = true)]
    cfg_weight: f32,

    /// Output audio file path
    #[arg(long)]
    output: PathBuf,
}

impl Cli {
    fn generate_options(&self) -> GenerateOptions {
        GenerateOptions {
            exaggeration: self.exageration,
            cfg_weight: self.cfg_weight,
            ..Default::default()
        }
    }
}

/// Returns the remediation text when the runtime fails to initialise.
fn check_runtime(init: impl FnOnce() -> voice_synth_core::Result<()>) -> Option<String> {
    init().err().map(|e| {
        format!(
            "Error: Missing required package. Please install with:\n{}\nOriginal error: {}",
            INSTALL_HINT, e
        )
    })
}

fn saved_message(output: &Path) -> String {
    format!("Audio saved to: {}", output.display())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    tracing::debug!(
        reference = %cli.reference.display(),
        output = %cli.output.display(),
        exaggeration = cli.exageration,
        cfg_weight = cli.cfg_weight,
        "Parsed arguments"
    );

    let device = select_device(&OrtProbe)?;
    println!("Using device: {}", device);

    let config = Config {
        device,
        ..Config::from_env()?
    };
    tracing::debug!(repo = %config.model_repo, dtype = ?config.dtype, "Loading model");
    let mut tts = ChatterboxTTS::new(config)?;

    let wav = tts.generate_with_reference(&cli.text, &cli.reference, cli.generate_options())?;

    write_wav(&cli.output, &wav, tts.sample_rate())?;
    println!("{}", saved_message(&cli.output));

    Ok(())
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();

    if let Some(message) = check_runtime(runtime::init) {
        eprintln!("{}", message);
        return ExitCode::from(MISSING_DEPENDENCY);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}
