//! llm.rs: text-completion client in front of the oracle.
//!
//! `LlmClient::complete` is the single entry point. The transport (HTTP
//! service or spawned CLI process) is a `CompletionBackend`; the client owns
//! the mode switch, the fragment fold for streamed replies and the optional
//! deadline. Every failure comes back as `GenerationFailed`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::GenerationFailed;

/// Lazy, single-pass sequence of text pieces from a streamed completion.
pub type FragmentStream = BoxStream<'static, Result<String, GenerationFailed>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionMode {
    /// One request, wait for the full reply.
    #[default]
    Buffered,
    /// One request, fold incremental fragments as they arrive.
    Streamed,
}

/// Unprocessed oracle output. Discarded once a statement has been extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCompletion(pub String);

impl RawCompletion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A transport able to reach the oracle.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Short label for logs, e.g. `ollama-http`.
    fn name(&self) -> &'static str;

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerationFailed>;

    async fn generate_stream(&self, model: &str, prompt: &str) -> Result<FragmentStream, GenerationFailed>;
}

// ─── Streamed fragments ──────────────────────────────────────────────────────

/// One line of a line-delimited JSON completion stream.
#[derive(Debug, Deserialize)]
struct Fragment {
    #[serde(default, alias = "text")]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Decode a single NDJSON line. Malformed lines are skipped, not fatal.
fn decode_fragment(line: &str) -> Result<Option<String>, GenerationFailed> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Fragment>(line) {
        Ok(Fragment { error: Some(message), .. }) => Err(GenerationFailed::Protocol(message)),
        Ok(fragment) => Ok(fragment.response.filter(|piece| !piece.is_empty())),
        Err(e) => {
            let preview: String = line.chars().take(80).collect();
            warn!("Skipping malformed stream fragment ({}): {}", e, preview);
            Ok(None)
        }
    }
}

/// Turn a stream of raw NDJSON lines into a stream of text pieces.
pub fn ndjson_fragments<S>(lines: S) -> impl Stream<Item = Result<String, GenerationFailed>>
where
    S: Stream<Item = Result<String, GenerationFailed>>,
{
    lines.try_filter_map(|line| futures::future::ready(decode_fragment(&line)))
}

/// Concatenate all pieces in arrival order.
pub async fn collect_fragments<S>(fragments: S) -> Result<String, GenerationFailed>
where
    S: Stream<Item = Result<String, GenerationFailed>>,
{
    fragments
        .try_fold(String::new(), |mut text, piece| async move {
            text.push_str(&piece);
            Ok(text)
        })
        .await
}

// ─── Client ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct LlmClient {
    backend: Arc<dyn CompletionBackend>,
    timeout: Option<Duration>,
}

impl LlmClient {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        info!("LLM backend: {}", backend.name());
        Self { backend, timeout: None }
    }

    /// Deadline applied to a whole `complete` call. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn complete(
        &self,
        model: &str,
        prompt: &str,
        mode: CompletionMode,
    ) -> Result<RawCompletion, GenerationFailed> {
        debug!("LLM call → {} (model={}, mode={:?}, prompt_len={})", self.backend.name(), model, mode, prompt.len());

        let work = async {
            match mode {
                CompletionMode::Buffered => self.backend.generate(model, prompt).await,
                CompletionMode::Streamed => {
                    let fragments = self.backend.generate_stream(model, prompt).await?;
                    collect_fragments(fragments).await
                }
            }
        };

        let text = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| GenerationFailed::Timeout(limit))??,
            None => work.await?,
        };

        debug!("LLM reply received (len={})", text.len());
        Ok(RawCompletion(text))
    }
}
