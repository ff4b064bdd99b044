//! Voice embedding cache for efficient repeated inference.

use crate::{Error, Result};
use ndarray::ArrayD;
use std::collections::HashMap;

/// Shortest reference clip accepted for cloning, in seconds.
pub const MIN_VOICE_SECONDS: f32 = 5.0;

/// Speech encoder outputs for one reference clip.
///
/// Pre-computing voice embeddings avoids redundant speech encoder runs
/// when generating multiple utterances with the same voice.
#[derive(Debug, Clone)]
pub struct VoiceEmbedding {
    /// Speaker embedding for conditioning the decoder
    pub speaker_embeddings: ArrayD<f32>,
    /// Speaker features for conditioning
    pub speaker_features: ArrayD<f32>,
    /// Prompt tokens from speech encoder
    pub prompt_token: ArrayD<i64>,
    /// Conditioning embedding for the language model
    pub cond_emb: ArrayD<f32>,
}

/// In-memory cache of voice embeddings.
#[derive(Debug, Default)]
pub struct VoiceCache {
    voices: HashMap<String, VoiceEmbedding>,
}

impl VoiceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a voice embedding, replacing any previous one under the same id.
    pub fn add(&mut self, id: impl Into<String>, embedding: VoiceEmbedding) {
        self.voices.insert(id.into(), embedding);
    }

    pub fn get(&self, id: &str) -> Option<&VoiceEmbedding> {
        self.voices.get(id)
    }

    /// Cached voice ids, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.voices.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }
}

/// Validate that audio is suitable for voice cloning.
///
/// Returns the duration in seconds or an error if too short.
pub fn validate_voice_audio(samples: &[f32], sample_rate: u32) -> Result<f32> {
    let duration = samples.len() as f32 / sample_rate as f32;
    if duration < MIN_VOICE_SECONDS {
        return Err(Error::VoiceAudioTooShort(duration));
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn embedding() -> VoiceEmbedding {
        VoiceEmbedding {
            speaker_embeddings: ArrayD::zeros(IxDyn(&[1, 192])),
            speaker_features: ArrayD::zeros(IxDyn(&[1, 10, 80])),
            prompt_token: ArrayD::zeros(IxDyn(&[1, 25])),
            cond_emb: ArrayD::zeros(IxDyn(&[1, 34, 1024])),
        }
    }

    #[test]
    fn test_cache_lifecycle() {
        let mut cache = VoiceCache::new();
        assert!(cache.list().is_empty());

        cache.add("narrator", embedding());
        cache.add("alice", embedding());
        assert_eq!(cache.list(), vec!["alice", "narrator"]);
        assert!(cache.get("alice").is_some());
        assert!(cache.get("bob").is_none());

        // Re-adding replaces rather than duplicates
        cache.add("alice", embedding());
        assert_eq!(cache.list(), vec!["alice", "narrator"]);
    }

    #[test]
    fn test_validate_duration() {
        let sr = 24000;
        let five_seconds = vec![0.0; sr as usize * 5];
        assert_eq!(validate_voice_audio(&five_seconds, sr).unwrap(), 5.0);

        let short = vec![0.0; sr as usize * 2];
        match validate_voice_audio(&short, sr) {
            Err(Error::VoiceAudioTooShort(d)) => assert!((d - 2.0).abs() < 1e-6),
            other => panic!("expected VoiceAudioTooShort, got {:?}", other),
        }
    }
}
