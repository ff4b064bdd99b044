//! Main TTS inference engine.

use crate::audio::{read_wav, resample_linear, SAMPLE_RATE};
use crate::config::{Config, Device, GenerateOptions, ModelDtype, DEFAULT_MODEL_REPO};
use crate::models::{download_models, ModelSessions};
use crate::voices::{validate_voice_audio, VoiceCache, VoiceEmbedding};
use crate::{Error, Result};

use half::f16;
use ndarray::{concatenate, s, Array, Array1, Array2, Array3, Array4, ArrayD, Axis, Ix2, Ix3, IxDyn};
use ort::{
    inputs,
    session::{Session, SessionInputValue},
    value::Value,
};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use tokenizers::Tokenizer;

// Model constants
const START_SPEECH_TOKEN: i64 = 6561;
const STOP_SPEECH_TOKEN: i64 = 6562;
const SILENCE_TOKEN: i64 = 4299;
const NUM_KV_HEADS: usize = 16;
const HEAD_DIM: usize = 64;

/// Name of the optional exaggeration input on the embedding and LM graphs.
const EXAGGERATION_INPUT: &str = "exaggeration";

type SessionInputs<'a> = Vec<(Cow<'a, str>, SessionInputValue<'a>)>;

/// Chatterbox TTS engine.
///
/// Provides text-to-speech generation with voice cloning capabilities.
pub struct ChatterboxTTS {
    sessions: ModelSessions,
    tokenizer: Tokenizer,
    voice_cache: VoiceCache,
    config: Config,
    /// Optional inputs declared by embed_tokens
    embed_inputs: OptionalInputs,
    /// Declared language model inputs; value is true when the input expects f16
    lm_inputs: HashMap<String, bool>,
}

/// Decoding state for one language-model branch (conditioned or not).
struct Branch {
    inputs_embeds: Array3<f32>,
    attention_mask: Array2<i64>,
    position_ids: Array2<i64>,
    past_key_values: HashMap<String, Array4<f32>>,
}

impl Branch {
    fn new(inputs_embeds: Array3<f32>, kv_names: &[String]) -> Result<Self> {
        let seq_len = inputs_embeds.shape()[1];
        let past_key_values = kv_names
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    Array4::<f32>::zeros((1, NUM_KV_HEADS, 0, HEAD_DIM)),
                )
            })
            .collect();
        Ok(Self {
            inputs_embeds,
            attention_mask: Array2::<i64>::ones((1, seq_len)),
            position_ids: Array::from_iter(0..seq_len as i64).into_shape_with_order((1, seq_len))?,
            past_key_values,
        })
    }

    /// Feed one more token embedding on the next step.
    fn advance(&mut self, next_embeds: Array3<f32>) -> Result<()> {
        let ones = Array2::<i64>::ones((1, 1));
        self.attention_mask = concatenate(Axis(1), &[self.attention_mask.view(), ones.view()])?;
        self.position_ids = self.position_ids.slice(s![.., -1..]).mapv(|x| x + 1);
        self.inputs_embeds = next_embeds;
        Ok(())
    }
}

/// Optional inputs a graph declares beyond its required ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct OptionalInputs {
    position_ids: bool,
    /// `Some(is_f16)` when the graph takes the exaggeration scalar
    exaggeration: Option<bool>,
}

impl OptionalInputs {
    fn of(declared: &HashMap<String, bool>) -> Self {
        Self {
            position_ids: declared.contains_key("position_ids"),
            exaggeration: declared.get(EXAGGERATION_INPUT).copied(),
        }
    }
}

/// Fails unless at least one graph consumes the exaggeration control.
fn require_exaggeration_input(
    repo: &str,
    embed: OptionalInputs,
    lm: OptionalInputs,
) -> Result<()> {
    if embed.exaggeration.is_none() && lm.exaggeration.is_none() {
        return Err(Error::Model(format!(
            "model '{}' has no '{}' input; use a Chatterbox export that declares one, such as {}",
            repo, EXAGGERATION_INPUT, DEFAULT_MODEL_REPO
        )));
    }
    Ok(())
}

fn declared_inputs(session: &Session) -> HashMap<String, bool> {
    session
        .inputs
        .iter()
        .map(|input| {
            let type_str = format!("{:?}", input.input_type);
            (input.name.clone(), type_str.contains("Float16"))
        })
        .collect()
}

impl ChatterboxTTS {
    /// Load the pretrained model onto `device` with otherwise default settings.
    ///
    /// Precision, repository and cache directory come from the
    /// `VOICE_SYNTH_*` environment variables when set.
    pub fn from_pretrained(device: Device) -> Result<Self> {
        let config = Config {
            device,
            ..Config::from_env()?
        };
        Self::new(config)
    }

    /// Create a new ChatterboxTTS instance.
    ///
    /// Downloads models if not cached, initializes ONNX sessions.
    pub fn new(config: Config) -> Result<Self> {
        tracing::info!(dtype = ?config.dtype, device = %config.device, "Downloading models");
        let paths = download_models(&config)?;

        tracing::info!("Loading tokenizer");
        let tokenizer =
            Tokenizer::from_file(&paths.tokenizer).map_err(|e| Error::Tokenizer(e.to_string()))?;

        let mut sessions = ModelSessions::new(paths, config.device);

        // Inspecting inputs loads both sessions up front
        let lm_inputs = declared_inputs(sessions.language_model()?);
        let embed_inputs = OptionalInputs::of(&declared_inputs(sessions.embed_tokens()?));
        require_exaggeration_input(
            &config.model_repo,
            embed_inputs,
            OptionalInputs::of(&lm_inputs),
        )?;

        Ok(Self {
            sessions,
            tokenizer,
            voice_cache: VoiceCache::new(),
            config,
            embed_inputs,
            lm_inputs,
        })
    }

    /// Sample rate of generated audio.
    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    /// Add a voice to the cache from an audio file.
    ///
    /// The audio must be at least 5 seconds long.
    pub fn add_voice(&mut self, id: impl Into<String>, audio_path: impl AsRef<Path>) -> Result<()> {
        let embedding = self.encode_reference(audio_path.as_ref())?;
        self.voice_cache.add(id, embedding);
        Ok(())
    }

    /// List all cached voice IDs.
    pub fn list_voices(&self) -> Vec<&str> {
        self.voice_cache.list()
    }

    /// Generate speech from text using a cached voice.
    pub fn generate(&mut self, text: &str, voice_id: &str, opts: GenerateOptions) -> Result<Vec<f32>> {
        let voice = self
            .voice_cache
            .get(voice_id)
            .ok_or_else(|| Error::VoiceNotFound(voice_id.to_string()))?
            .clone();

        self.generate_with_embedding(text, &voice, &opts)
    }

    /// Generate speech cloned from a reference clip without caching it.
    pub fn generate_with_reference(
        &mut self,
        text: &str,
        reference: impl AsRef<Path>,
        opts: GenerateOptions,
    ) -> Result<Vec<f32>> {
        let voice = self.encode_reference(reference.as_ref())?;
        self.generate_with_embedding(text, &voice, &opts)
    }

    fn encode_reference(&mut self, path: &Path) -> Result<VoiceEmbedding> {
        let (samples, sr) = read_wav(path)?;
        let samples = samples.to_vec();

        validate_voice_audio(&samples, sr)?;

        let samples = if sr != SAMPLE_RATE {
            tracing::debug!(from = sr, to = SAMPLE_RATE, "Resampling reference audio");
            resample_linear(&samples, sr, SAMPLE_RATE)
        } else {
            samples
        };

        self.encode_voice(Array1::from_vec(samples))
    }

    /// Encode a voice sample into embeddings.
    fn encode_voice(&mut self, samples: Array1<f32>) -> Result<VoiceEmbedding> {
        let dtype = self.config.dtype;
        let audio_val = Value::from_array(samples.insert_axis(Axis(0)).into_dyn())?;

        let speech_encoder = self.sessions.speech_encoder()?;
        let outputs = speech_encoder.run(inputs!["audio_values" => audio_val])?;

        let cond_emb = extract_f32_tensor(&outputs["audio_features"], dtype)?;
        let speaker_embeddings = extract_f32_tensor(&outputs["speaker_embeddings"], dtype)?;
        let speaker_features = extract_f32_tensor(&outputs["speaker_features"], dtype)?;

        let (s, d) = outputs["audio_tokens"].try_extract_tensor::<i64>()?;
        let prompt_token = ArrayD::from_shape_vec(shape_to_vec(s), d.to_vec())?;

        Ok(VoiceEmbedding {
            cond_emb,
            speaker_embeddings,
            speaker_features,
            prompt_token,
        })
    }

    /// Run embed_tokens on a block of token ids.
    fn embed(
        &mut self,
        input_ids: &Array2<i64>,
        position_ids: &Array2<i64>,
        exaggeration: f32,
    ) -> Result<Array3<f32>> {
        let dtype = self.config.dtype;
        let mut feeds: SessionInputs<'_> = vec![(
            "input_ids".into(),
            Value::from_array(input_ids.clone().into_dyn())?.into(),
        )];
        if self.embed_inputs.position_ids {
            feeds.push((
                "position_ids".into(),
                Value::from_array(position_ids.clone().into_dyn())?.into(),
            ));
        }
        if let Some(is_f16) = self.embed_inputs.exaggeration {
            feeds.push((EXAGGERATION_INPUT.into(), scalar_tensor(exaggeration, is_f16)?.into()));
        }

        let embed_tokens = self.sessions.embed_tokens()?;
        let outputs = embed_tokens.run(feeds)?;
        let embeds = extract_f32_tensor(&outputs["inputs_embeds"], dtype)?.into_dimensionality::<Ix3>()?;
        Ok(embeds)
    }

    /// Run one language model step and return the last position's logits.
    ///
    /// The branch's KV cache is replaced with the model's present values.
    fn step(&mut self, branch: &mut Branch, exaggeration: f32) -> Result<Array2<f32>> {
        let dtype = self.config.dtype;
        let lm_inputs = &self.lm_inputs;
        let is_f16 = |name: &str| lm_inputs.get(name).copied().unwrap_or(false);

        let mut feeds: SessionInputs<'_> = Vec::new();
        feeds.push((
            "inputs_embeds".into(),
            make_tensor(&branch.inputs_embeds.clone().into_dyn(), is_f16("inputs_embeds"))?.into(),
        ));
        feeds.push((
            "attention_mask".into(),
            Value::from_array(branch.attention_mask.clone().into_dyn())?.into(),
        ));
        feeds.push((
            "position_ids".into(),
            Value::from_array(branch.position_ids.clone().into_dyn())?.into(),
        ));
        for (name, cache) in &branch.past_key_values {
            feeds.push((
                name.clone().into(),
                make_tensor(&cache.clone().into_dyn(), is_f16(name))?.into(),
            ));
        }
        if let Some(is_f16) = OptionalInputs::of(lm_inputs).exaggeration {
            feeds.push((EXAGGERATION_INPUT.into(), scalar_tensor(exaggeration, is_f16)?.into()));
        }

        let lm = self.sessions.language_model()?;
        let outputs = lm.run(feeds)?;

        let logits = extract_f32_tensor(&outputs["logits"], dtype)?;
        let last_logits = logits
            .slice(s![.., -1, ..])
            .to_owned()
            .into_dimensionality::<Ix2>()?;

        let mut present: Vec<(String, Array4<f32>)> = Vec::new();
        for input_name in branch.past_key_values.keys() {
            let output_name = input_name.replace("past_key_values", "present");
            if let Some(val) = outputs.get(&output_name) {
                let (s_vec, data) = if is_f16(input_name) {
                    let (s, d) = val.try_extract_tensor::<f16>()?;
                    (shape_to_vec(s), d.iter().map(|x| x.to_f32()).collect::<Vec<f32>>())
                } else {
                    let (s, d) = val.try_extract_tensor::<f32>()?;
                    (shape_to_vec(s), d.to_vec())
                };
                if s_vec.len() == 4 {
                    let tensor =
                        Array4::from_shape_vec((s_vec[0], s_vec[1], s_vec[2], s_vec[3]), data)?;
                    present.push((input_name.clone(), tensor));
                }
            }
        }

        // Release the session borrow before touching the branch again
        drop(outputs);

        branch.past_key_values.extend(present);
        Ok(last_logits)
    }

    /// Main generation logic.
    fn generate_with_embedding(
        &mut self,
        text: &str,
        voice: &VoiceEmbedding,
        opts: &GenerateOptions,
    ) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| Error::Tokenizer(e.to_string()))?;
        let input_ids_vec: Vec<i64> = encoding.get_ids().iter().map(|&x| x as i64).collect();
        let text_len = input_ids_vec.len();
        let input_ids = Array2::from_shape_vec((1, text_len), input_ids_vec)?;
        let text_positions =
            Array::from_iter(0..text_len as i64).into_shape_with_order((1, text_len))?;

        let text_embeds = self.embed(&input_ids, &text_positions, opts.exaggeration)?;
        let cond_emb = voice.cond_emb.view().into_dimensionality::<Ix3>()?;

        let kv_names: Vec<String> = self
            .lm_inputs
            .keys()
            .filter(|name| name.contains("past_key_values"))
            .cloned()
            .collect();

        let conditioned: Array3<f32> =
            concatenate(Axis(1), &[cond_emb.view(), text_embeds.view()])?;
        let mut cond = Branch::new(conditioned, &kv_names)?;

        // Unconditioned branch sees the voice but not the text
        let mut uncond = if opts.cfg_weight != 0.0 {
            let blank_text = Array3::<f32>::zeros(text_embeds.raw_dim());
            let unconditioned = concatenate(Axis(1), &[cond_emb.view(), blank_text.view()])?;
            Some(Branch::new(unconditioned, &kv_names)?)
        } else {
            None
        };

        tracing::debug!(
            text_tokens = text_len,
            cfg = uncond.is_some(),
            exaggeration = opts.exaggeration,
            cfg_weight = opts.cfg_weight,
            "Starting generation"
        );

        let mut generated: Vec<i64> = vec![START_SPEECH_TOKEN];
        let mut speech_position: i64 = 0;

        for _step in 0..opts.max_tokens {
            let mut logits = self.step(&mut cond, opts.exaggeration)?;
            if let Some(branch) = uncond.as_mut() {
                let uncond_logits = self.step(branch, opts.exaggeration)?;
                logits = apply_cfg(&logits, &uncond_logits, opts.cfg_weight);
            }

            apply_repetition_penalty(&mut logits, &generated, opts.repetition_penalty);
            let next_token_id = argmax(&logits)
                .ok_or_else(|| Error::Model("language model returned empty logits".into()))?;
            generated.push(next_token_id);

            if next_token_id == STOP_SPEECH_TOKEN {
                break;
            }

            speech_position += 1;
            let next_token = Array2::from_elem((1, 1), next_token_id);
            let next_position = Array2::from_elem((1, 1), speech_position);
            let next_embeds = self.embed(&next_token, &next_position, opts.exaggeration)?;

            if let Some(branch) = uncond.as_mut() {
                branch.advance(next_embeds.clone())?;
            }
            cond.advance(next_embeds)?;
        }

        tracing::debug!(tokens = generated.len() - 1, "Generation finished");

        // Drop the start token and, when present, the stop token
        let end = if generated.last() == Some(&STOP_SPEECH_TOKEN) && generated.len() > 1 {
            generated.len() - 1
        } else {
            generated.len()
        };
        let speech_tokens = &generated[1..end];

        let prompt_token_2d = voice.prompt_token.clone().into_dimensionality::<Ix2>()?;
        let speech_tokens = Array2::from_shape_vec((1, speech_tokens.len()), speech_tokens.to_vec())?;
        let silence = Array2::<i64>::from_elem((1, 3), SILENCE_TOKEN);

        let speech_input = concatenate(
            Axis(1),
            &[prompt_token_2d.view(), speech_tokens.view(), silence.view()],
        )?;

        let decoder = self.sessions.conditional_decoder()?;
        let wav_output = decoder.run(inputs![
            "speech_tokens" => Value::from_array(speech_input.into_dyn())?,
            "speaker_embeddings" => Value::from_array(voice.speaker_embeddings.clone())?,
            "speaker_features" => Value::from_array(voice.speaker_features.clone())?
        ])?;

        let (_, d) = wav_output[0].try_extract_tensor::<f32>()?;
        Ok(d.to_vec())
    }
}

/// Classifier-free guidance: push conditioned logits away from unconditioned ones.
fn apply_cfg(cond: &Array2<f32>, uncond: &Array2<f32>, weight: f32) -> Array2<f32> {
    cond + &((cond - uncond) * weight)
}

/// Penalize tokens that were already generated.
fn apply_repetition_penalty(logits: &mut Array2<f32>, generated: &[i64], penalty: f32) {
    let vocab = logits.shape()[1];
    for &token_id in generated {
        if token_id >= 0 && (token_id as usize) < vocab {
            let score = logits[[0, token_id as usize]];
            logits[[0, token_id as usize]] = if score < 0.0 {
                score * penalty
            } else {
                score / penalty
            };
        }
    }
}

/// Greedy choice over the first row; NaNs never win.
fn argmax(logits: &Array2<f32>) -> Option<i64> {
    logits
        .row(0)
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(idx, _)| idx as i64)
}

/// Extract f32 tensor, handling f16 conversion if needed.
fn extract_f32_tensor(val: &Value, dtype: ModelDtype) -> Result<ArrayD<f32>> {
    if matches!(dtype, ModelDtype::Fp16) {
        if let Ok((s, d)) = val.try_extract_tensor::<f16>() {
            let f32_data: Vec<f32> = d.iter().map(|x| x.to_f32()).collect();
            return Ok(ArrayD::from_shape_vec(shape_to_vec(s), f32_data)?);
        }
    }
    let (s, d) = val.try_extract_tensor::<f32>()?;
    Ok(ArrayD::from_shape_vec(shape_to_vec(s), d.to_vec())?)
}

/// Create ORT tensor with correct dtype.
fn make_tensor(arr: &ArrayD<f32>, is_f16: bool) -> Result<Value> {
    if is_f16 {
        let arr_f16 = arr.mapv(f16::from_f32);
        Ok(Value::from_array(arr_f16)?.into_dyn())
    } else {
        Ok(Value::from_array(arr.to_owned())?.into_dyn())
    }
}

/// One-element tensor for scalar conditioning inputs.
fn scalar_tensor(value: f32, is_f16: bool) -> Result<Value> {
    make_tensor(&ArrayD::from_elem(IxDyn(&[1]), value), is_f16)
}

/// Convert ORT shape to Vec<usize>.
fn shape_to_vec(shape: &ort::tensor::Shape) -> Vec<usize> {
    let dims: &[i64] = shape.as_ref();
    dims.iter().map(|&x| x as usize).collect()
}
