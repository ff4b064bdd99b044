//! Routes, shared state and error handling.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use voice_synth_core::{audio::write_wav, ChatterboxTTS, GenerateOptions};

use crate::page::render_index;
use crate::voices::{available_voices, output_filename};

/// Default exaggeration for HTTP requests that omit it.
pub const DEFAULT_EXAGERATION: f32 = 0.5;
/// Default CFG weight for HTTP requests that omit it.
pub const DEFAULT_CFG_WEIGHT: f32 = 0.5;

/// Anything that can turn text plus a named reference clip into samples.
pub trait Synthesizer: Send {
    /// Returns mono samples and their sample rate.
    fn synthesize(
        &mut self,
        text: &str,
        voice: &str,
        reference: &Path,
        opts: GenerateOptions,
    ) -> voice_synth_core::Result<(Vec<f32>, u32)>;
}

impl Synthesizer for ChatterboxTTS {
    /// Encodes each voice once and reuses the cached embedding afterwards.
    fn synthesize(
        &mut self,
        text: &str,
        voice: &str,
        reference: &Path,
        opts: GenerateOptions,
    ) -> voice_synth_core::Result<(Vec<f32>, u32)> {
        if !self.list_voices().contains(&voice) {
            tracing::info!(voice, reference = %reference.display(), "Encoding voice");
            self.add_voice(voice, reference)?;
        }
        let samples = self.generate(text, voice, opts)?;
        Ok((samples, self.sample_rate()))
    }
}

#[derive(Clone)]
pub struct AppState {
    synthesizer: Arc<Mutex<Box<dyn Synthesizer>>>,
    references_dir: PathBuf,
    output_dir: PathBuf,
}

impl AppState {
    pub fn new(
        synthesizer: impl Synthesizer + 'static,
        references_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            synthesizer: Arc::new(Mutex::new(Box::new(synthesizer))),
            references_dir: references_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn references_dir(&self) -> &Path {
        &self.references_dir
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/voices", get(list_voices))
        .route("/synthesize", post(synthesize))
        .fallback(not_found)
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let voices = available_voices(&state.references_dir).await;
    Html(render_index(&voices))
}

async fn list_voices(State(state): State<AppState>) -> impl IntoResponse {
    let voices = available_voices(&state.references_dir).await;
    Json(serde_json::json!({ "voices": voices }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

#[derive(Debug, Deserialize)]
struct SynthesizeRequest {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    exageration: Option<f32>,
    #[serde(default)]
    cfg_weight: Option<f32>,
    #[serde(default)]
    output_filename: Option<String>,
}

/// `Content-Disposition` for the returned audio.
///
/// Names that cannot travel as a quoted ASCII string get an RFC 5987
/// `filename*` parameter next to an ASCII fallback.
fn content_disposition(voice: &str) -> HeaderValue {
    let filename = format!("{}_voice.wav", voice);
    let plain = filename
        .chars()
        .all(|c| (c.is_ascii_graphic() || c == ' ') && c != '"' && c != '\\');
    if plain {
        if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename)) {
            return value;
        }
    }

    let fallback: String = filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(&filename)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

async fn synthesize(
    State(state): State<AppState>,
    payload: Result<Json<SynthesizeRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload.map_err(AppError::rejected)?;
    let (text, voice) = match (req.text, req.voice) {
        (Some(text), Some(voice)) if !text.is_empty() && !voice.is_empty() => (text, voice),
        _ => {
            return Err(AppError::bad_request(
                "text and voice parameters are required",
            ))
        }
    };

    let voices = available_voices(&state.references_dir).await;
    if !voices.contains(&voice) {
        return Err(AppError::bad_request(format!(
            "Invalid voice. Available voices: {}",
            voices.join(", ")
        )));
    }

    let opts = GenerateOptions {
        exaggeration: req.exageration.unwrap_or(DEFAULT_EXAGERATION),
        cfg_weight: req.cfg_weight.unwrap_or(DEFAULT_CFG_WEIGHT),
        ..Default::default()
    };

    tokio::fs::create_dir_all(&state.output_dir).await?;
    let output_path = state
        .output_dir
        .join(output_filename(req.output_filename.as_deref()));
    let reference = state.references_dir.join(format!("{}.wav", voice));
    let disposition = content_disposition(&voice);

    tracing::info!(voice = %voice, output = %output_path.display(), "Synthesizing");

    // Write, read back and remove all happen under the model lock
    let synthesizer = state.synthesizer.clone();
    let audio = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
        let mut synthesizer = synthesizer
            .lock()
            .map_err(|_| anyhow::anyhow!("synthesizer lock poisoned"))?;
        let (samples, sample_rate) = synthesizer.synthesize(&text, &voice, &reference, opts)?;
        write_wav(&output_path, &samples, sample_rate)?;
        let audio = std::fs::read(&output_path)?;
        if let Err(e) = std::fs::remove_file(&output_path) {
            tracing::warn!(path = %output_path.display(), "Failed to remove output file: {}", e);
        }
        Ok(audio)
    })
    .await??;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("audio/wav")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        audio,
    )
        .into_response())
}

/// Error rendered as `{"error": "..."}` with a status code.
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    fn bad_request(msg: impl Into<String>) -> Self {
        AppError {
            status: StatusCode::BAD_REQUEST,
            error: anyhow::anyhow!(msg.into()),
        }
    }

    /// Body that failed to parse as a request, keeping axum's status code.
    fn rejected(rejection: JsonRejection) -> Self {
        AppError {
            status: rejection.status(),
            error: anyhow::anyhow!(rejection.body_text()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("Error: {:#}", self.error);
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.error.to_string() })),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use voice_synth_core::{audio::read_wav, Error};

    /// Records the options it was called with and returns a short tone.
    struct FakeSynth {
        calls: Arc<Mutex<Vec<(String, PathBuf, f32, f32)>>>,
        fail: bool,
    }

    impl Synthesizer for FakeSynth {
        fn synthesize(
            &mut self,
            text: &str,
            voice: &str,
            reference: &Path,
            opts: GenerateOptions,
        ) -> voice_synth_core::Result<(Vec<f32>, u32)> {
            assert_eq!(reference.file_stem().and_then(|s| s.to_str()), Some(voice));
            self.calls.lock().unwrap().push((
                text.to_string(),
                reference.to_path_buf(),
                opts.exaggeration,
                opts.cfg_weight,
            ));
            if self.fail {
                return Err(Error::Model("out of memory".into()));
            }
            Ok((vec![0.0, 0.5, -0.5, 0.25], 24000))
        }
    }

    struct Fixture {
        _dir: TempDir,
        references: PathBuf,
        output: PathBuf,
        calls: Arc<Mutex<Vec<(String, PathBuf, f32, f32)>>>,
        app: Router,
    }

    fn fixture(fail: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let references = dir.path().join("references");
        let output = dir.path().join("output");
        std::fs::create_dir(&references).unwrap();
        for voice in ["narrator", "alice"] {
            std::fs::write(references.join(format!("{}.wav", voice)), b"").unwrap();
        }

        let calls = Arc::new(Mutex::new(Vec::new()));
        let synth = FakeSynth {
            calls: calls.clone(),
            fail,
        };
        let app = router(AppState::new(synth, &references, &output));
        Fixture {
            _dir: dir,
            references,
            output,
            calls,
            app,
        }
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_list_voices() {
        let fx = fixture(false);
        let response = fx
            .app
            .oneshot(Request::get("/voices").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({ "voices": ["alice", "narrator"] })
        );
    }

    #[tokio::test]
    async fn test_index_lists_voices() {
        let fx = fixture(false);
        let response = fx
            .app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains(r#"<option value="narrator">narrator</option>"#));
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let fx = fixture(false);
        let response = fx
            .app
            .oneshot(Request::get("/synthesize").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let fx = fixture(false);
        let response = fx
            .app
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"Not Found");
    }

    #[tokio::test]
    async fn test_missing_fields() {
        let fx = fixture(false);
        let response = fx
            .app
            .oneshot(post_json("/synthesize", serde_json::json!({ "text": "hi" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"],
            "text and voice parameters are required"
        );
        assert!(fx.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_voice() {
        let fx = fixture(false);
        let response = fx
            .app
            .oneshot(post_json(
                "/synthesize",
                serde_json::json!({ "text": "hi", "voice": "bob" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"],
            "Invalid voice. Available voices: alice, narrator"
        );
    }

    #[tokio::test]
    async fn test_synthesize_returns_wav() {
        let fx = fixture(false);
        let response = fx
            .app
            .oneshot(post_json(
                "/synthesize",
                serde_json::json!({
                    "text": "Hello there",
                    "voice": "narrator",
                    "cfg_weight": 0.8,
                    "output_filename": "greeting"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"narrator_voice.wav\""
        );

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let scratch = TempDir::new().unwrap();
        let copy = scratch.path().join("copy.wav");
        std::fs::write(&copy, &bytes).unwrap();
        let (samples, sr) = read_wav(&copy).unwrap();
        assert_eq!(sr, 24000);
        assert_eq!(samples.to_vec(), vec![0.0, 0.5, -0.5, 0.25]);

        // Served files are not kept
        assert!(!fx.output.join("greeting.wav").exists());

        let calls = fx.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (text, reference, exaggeration, cfg_weight) = &calls[0];
        assert_eq!(text, "Hello there");
        assert_eq!(reference, &fx.references.join("narrator.wav"));
        assert_eq!(*exaggeration, DEFAULT_EXAGERATION);
        assert_eq!(*cfg_weight, 0.8);
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_500() {
        let fx = fixture(true);
        let response = fx
            .app
            .oneshot(post_json(
                "/synthesize",
                serde_json::json!({ "text": "hi", "voice": "alice" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("out of memory"));
    }

    #[tokio::test]
    async fn test_output_filename_cannot_escape_output_dir() {
        let fx = fixture(false);
        let outside = fx.references.parent().unwrap().join("keep.wav");
        std::fs::write(&outside, b"precious").unwrap();

        for requested in [
            outside.with_extension("").display().to_string(),
            "../keep".to_string(),
        ] {
            let response = fx
                .app
                .clone()
                .oneshot(post_json(
                    "/synthesize",
                    serde_json::json!({
                        "text": "hi",
                        "voice": "alice",
                        "output_filename": requested
                    }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(std::fs::read(&outside).unwrap(), b"precious");
        }
        assert!(!fx.output.join("keep.wav").exists());
    }

    #[tokio::test]
    async fn test_concurrent_requests_sharing_filename() {
        let fx = fixture(false);
        let request = || {
            post_json(
                "/synthesize",
                serde_json::json!({
                    "text": "hi",
                    "voice": "narrator",
                    "output_filename": "shared"
                }),
            )
        };

        let (first, second) = tokio::join!(
            fx.app.clone().oneshot(request()),
            fx.app.clone().oneshot(request())
        );
        for response in [first.unwrap(), second.unwrap()] {
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&bytes[..4], b"RIFF");
        }
        assert_eq!(fx.calls.lock().unwrap().len(), 2);
        assert!(!fx.output.join("shared.wav").exists());
    }

    #[tokio::test]
    async fn test_bad_body_is_json_error() {
        let fx = fixture(false);
        let response = fx
            .app
            .clone()
            .oneshot(post_json(
                "/synthesize",
                serde_json::json!({ "text": "hi", "voice": "alice", "exageration": "0.5" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json_body(response).await["error"].is_string());

        let response = fx
            .app
            .clone()
            .oneshot(
                Request::post("/synthesize")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());

        let response = fx
            .app
            .oneshot(
                Request::post("/synthesize")
                    .body(Body::from(r#"{"text":"hi","voice":"alice"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(json_body(response).await["error"].is_string());
        assert!(fx.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_ascii_voice_name() {
        let fx = fixture(false);
        std::fs::write(fx.references.join("émilie.wav"), b"").unwrap();

        let response = fx
            .app
            .oneshot(post_json(
                "/synthesize",
                serde_json::json!({ "text": "bonjour", "voice": "émilie" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"_milie_voice.wav\"; filename*=UTF-8''%C3%A9milie_voice.wav"
        );
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("narrator"),
            "attachment; filename=\"narrator_voice.wav\""
        );
        assert_eq!(
            content_disposition("my \"best\""),
            "attachment; filename=\"my__best__voice.wav\"; filename*=UTF-8''my%20%22best%22_voice.wav"
        );
    }
}
