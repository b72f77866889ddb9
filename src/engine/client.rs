//! Engine HTTP client: two-step synthesis with retry/backoff.
//!
//! Every sentence costs two sequential requests against the local engine:
//! 1. POST /audio_query?text=..&speaker=..  → acoustic parameter JSON
//! 2. POST /synthesis?speaker=..  (JSON body) → WAV bytes
//!
//! The engine is a local service that drops connections while (re)loading
//! models, so both steps retry with exponential backoff before failing.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::EngineConfig;

/// Synthesized audio plus the MIME type the engine reported.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Classified request failure. Both kinds are retried up to the policy's
/// budget; whatever failed last is what the caller sees.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SynthesisError {
    #[error("cannot reach the engine: {0}")]
    Network(String),
    #[error("engine returned HTTP {0}")]
    HttpStatus(u16),
}

/// Retry schedule shared by every engine request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Delay inserted after failed attempt `attempt_index` (0-based):
    /// base, 2×base, 4×base, ...
    fn delay_after(&self, attempt_index: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt_index)
    }
}

/// Run `op` up to `max_retries` times, sleeping between failures per the
/// policy. Resolves to the first success or the last classified error.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, SynthesisError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SynthesisError>>,
{
    let mut last_err = SynthesisError::Network("no attempts were made".into());
    for attempt in 0..policy.max_retries {
        if attempt > 0 {
            sleep(policy.delay_after(attempt - 1)).await;
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt + 1 < policy.max_retries {
                    warn!(
                        "Engine request failed, retrying ({}/{}): {e}",
                        attempt + 1,
                        policy.max_retries
                    );
                }
                last_err = e;
            }
        }
    }
    Err(last_err)
}

pub struct EngineClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl EngineClient {
    pub fn new(config: &EngineConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                backoff_base: Duration::from_millis(config.backoff_base_ms),
            },
        }
    }

    /// Send one request (rebuilt per attempt) through the retry wrapper.
    /// Non-success statuses and transport errors are both retried.
    async fn request<F>(&self, make: F) -> Result<reqwest::Response, SynthesisError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        retry_with_backoff(&self.retry, || {
            let request = make();
            async move {
                let resp = request
                    .send()
                    .await
                    .map_err(|e| SynthesisError::Network(e.to_string()))?;
                if resp.status().is_success() {
                    Ok(resp)
                } else {
                    Err(SynthesisError::HttpStatus(resp.status().as_u16()))
                }
            }
        })
        .await
    }

    /// GET a JSON document from the engine.
    pub(crate) async fn get_json(&self, path: &str) -> Result<Value, SynthesisError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self.request(|| self.http.get(&url)).await?;
        resp.json()
            .await
            .map_err(|e| SynthesisError::Network(e.to_string()))
    }

    /// Step 1: acoustic parameter query for (text, speaker). The payload
    /// is opaque to us; it goes straight back out in step 2.
    async fn audio_query(&self, text: &str, speaker: u32) -> Result<Value, SynthesisError> {
        let url = format!("{}/audio_query", self.base_url);
        let speaker_param = speaker.to_string();
        let resp = self
            .request(|| {
                self.http
                    .post(&url)
                    .query(&[("text", text), ("speaker", speaker_param.as_str())])
            })
            .await?;
        resp.json()
            .await
            .map_err(|e| SynthesisError::Network(e.to_string()))
    }

    /// Step 2: submit the parameter payload, receive binary audio.
    async fn synthesis(&self, query: &Value, speaker: u32) -> Result<AudioClip, SynthesisError> {
        let url = format!("{}/synthesis", self.base_url);
        let speaker_param = speaker.to_string();
        let resp = self
            .request(|| {
                self.http
                    .post(&url)
                    .query(&[("speaker", speaker_param.as_str())])
                    .json(query)
            })
            .await?;

        let mime = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/wav")
            .to_string();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SynthesisError::Network(e.to_string()))?;

        debug!("Synthesis returned {} bytes ({mime})", bytes.len());
        Ok(AudioClip {
            bytes: bytes.to_vec(),
            mime,
        })
    }

    /// Full two-step synthesis for one sentence. If the query step
    /// exhausts its retries the synthesis step is never attempted.
    pub async fn synthesize(&self, text: &str, speaker: u32) -> Result<AudioClip, SynthesisError> {
        debug!(
            "audio_query: {} chars, speaker {speaker}",
            text.chars().count()
        );
        let query = self.audio_query(text, speaker).await?;
        self.synthesis(&query, speaker).await
    }
}

/// Synthesis backend seam. The playback controller only knows this trait,
/// so tests can drive it without an engine on the network.
#[async_trait]
pub trait Synthesizer: Send + Sync + 'static {
    async fn synthesize(&self, text: &str, speaker: u32) -> Result<AudioClip, SynthesisError>;
}

#[async_trait]
impl Synthesizer for EngineClient {
    async fn synthesize(&self, text: &str, speaker: u32) -> Result<AudioClip, SynthesisError> {
        EngineClient::synthesize(self, text, speaker).await
    }
}
