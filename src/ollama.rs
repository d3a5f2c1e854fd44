//! ollama.rs: the two ways of reaching a local Ollama oracle.
//!
//! - `OllamaHttp` talks to the HTTP API (`POST /api/generate`).
//! - `OllamaCli` spawns `ollama run <model> <prompt>` and reads stdout.
//!
//! Both implement `CompletionBackend`, so the client does not care which one
//! is configured.

use std::process::Stdio;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use crate::error::GenerationFailed;
use crate::llm::{ndjson_fragments, CompletionBackend, FragmentStream};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

// ─── HTTP backend ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(alias = "text")]
    response: String,
}

pub struct OllamaHttp {
    http: Client,
    base_url: String,
    temperature: f32,
}

impl OllamaHttp {
    pub fn new(base_url: impl Into<String>, temperature: f32) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            temperature,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    async fn post(&self, model: &str, prompt: &str, stream: bool) -> Result<reqwest::Response, GenerationFailed> {
        let body = GenerateRequest {
            model,
            prompt,
            stream,
            options: GenerateOptions { temperature: self.temperature },
        };

        let resp = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationFailed::Unreachable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(300).collect();
            return Err(GenerationFailed::Status { status, body: truncated });
        }
        Ok(resp)
    }
}

#[async_trait]
impl CompletionBackend for OllamaHttp {
    fn name(&self) -> &'static str {
        "ollama-http"
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerationFailed> {
        let resp = self.post(model, prompt, false).await?;
        let data: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| GenerationFailed::Protocol(format!("unexpected reply body: {e}")))?;
        Ok(data.response)
    }

    async fn generate_stream(&self, model: &str, prompt: &str) -> Result<FragmentStream, GenerationFailed> {
        let resp = self.post(model, prompt, true).await?;

        let body = Box::pin(resp.bytes_stream().map_err(|e| std::io::Error::other(e)));
        let lines = StreamReader::new(body).lines();

        let raw = stream::try_unfold(lines, |mut lines| async move {
            let next = lines
                .next_line()
                .await
                .map_err(|e| GenerationFailed::Stream(e.to_string()))?;
            Ok(next.map(|line| (line, lines)))
        });

        Ok(ndjson_fragments(raw).boxed())
    }
}

// ─── CLI backend ─────────────────────────────────────────────────────────────

pub struct OllamaCli {
    binary: String,
}

impl OllamaCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    fn command(&self, model: &str, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("run")
            .arg(model)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_failed(&self, e: std::io::Error) -> GenerationFailed {
        GenerationFailed::Unreachable(format!("cannot run `{}`: {}", self.binary, e))
    }
}

#[async_trait]
impl CompletionBackend for OllamaCli {
    fn name(&self) -> &'static str {
        "ollama-cli"
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerationFailed> {
        let output = self
            .command(model, prompt)
            .output()
            .await
            .map_err(|e| self.spawn_failed(e))?;

        if !output.status.success() {
            return Err(GenerationFailed::ProcessExit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn generate_stream(&self, model: &str, prompt: &str) -> Result<FragmentStream, GenerationFailed> {
        let mut child = self.command(model, prompt).spawn().map_err(|e| self.spawn_failed(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GenerationFailed::Stream("child stdout not captured".into()))?;

        // Drain stderr concurrently so a chatty process cannot block on a full pipe.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                if let Err(e) = stderr.read_to_string(&mut buf).await {
                    debug!("stderr read failed: {}", e);
                }
                buf
            })
        });

        let state = Some((BufReader::new(stdout).lines(), child, stderr_task));
        let pieces = stream::try_unfold(state, |state| async move {
            let Some((mut lines, mut child, stderr_task)) = state else {
                return Ok(None);
            };

            let next = lines
                .next_line()
                .await
                .map_err(|e| GenerationFailed::Stream(e.to_string()))?;

            if let Some(line) = next {
                return Ok(Some((format!("{line}\n"), Some((lines, child, stderr_task)))));
            }

            let status = child
                .wait()
                .await
                .map_err(|e| GenerationFailed::Stream(e.to_string()))?;
            if status.success() {
                return Ok(None);
            }

            let stderr = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            warn!("ollama exited with {:?} mid-stream", status.code());
            Err(GenerationFailed::ProcessExit {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            })
        });

        Ok(pieces.boxed())
    }
}
