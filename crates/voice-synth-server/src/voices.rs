//! Reference voice discovery and output file naming.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Voices are the `.wav` files in the references directory, without extension.
///
/// An unreadable directory yields an empty list.
pub async fn available_voices(dir: &Path) -> Vec<String> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(dir = %dir.display(), "Error reading references directory: {}", e);
            return Vec::new();
        }
    };

    let mut voices = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let is_file = entry
                    .file_type()
                    .await
                    .map(|t| t.is_file())
                    .unwrap_or(false);
                let name = entry.file_name().to_string_lossy().into_owned();
                if let Some(voice) = name.strip_suffix(".wav") {
                    if is_file && !voice.is_empty() {
                        voices.push(voice.to_string());
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!(dir = %dir.display(), "Error reading references directory: {}", e);
                break;
            }
        }
    }

    voices.sort();
    voices
}

/// Name of the generated file: the caller's choice or a unique default,
/// always ending in `.wav`.
///
/// Only the final component of the requested name is kept, so the result
/// never leaves the output directory it is joined onto.
pub fn output_filename(requested: Option<&str>) -> String {
    let name = requested
        .and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(generated_name);
    if name.to_lowercase().ends_with(".wav") {
        name
    } else {
        format!("{}.wav", name)
    }
}

fn generated_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("voice_{}_{}", millis, &suffix[..9])
}
