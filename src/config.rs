use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::llm::CompletionMode;
use crate::sanitize::SafetyPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server:   ServerConfig,
    pub database: DatabaseConfig,
    pub llm:      LlmConfig,
    pub schema:   SchemaConfig,
    pub safety:   SafetyConfig,
    pub delivery: DeliveryConfig,
    pub logging:  LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}
impl Default for ServerConfig {
    fn default() -> Self { Self { bind: "0.0.0.0:5000".into() } }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path:     PathBuf,
    /// Rows returned per statement before the result is cut
    pub max_rows: usize,
}
impl Default for DatabaseConfig {
    fn default() -> Self { Self { path: "ma_base.db".into(), max_rows: 1_000 } }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ollama HTTP API
    #[default]
    Http,
    /// `ollama run` subprocess
    Cli,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub backend:      BackendKind,
    /// Ollama server base URL (e.g. "http://localhost:11434")
    pub base_url:     String,
    /// Model name (e.g. "sqlcoder", "gemma3")
    pub model:        String,
    /// Binary spawned by the CLI backend
    pub cli_binary:   String,
    pub mode:         CompletionMode,
    /// Deadline for one completion; unset waits indefinitely
    pub timeout_secs: Option<u64>,
    pub temperature:  f32,
}
impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend:      BackendKind::Http,
            base_url:     crate::ollama::DEFAULT_BASE_URL.into(),
            model:        "sqlcoder".into(),
            cli_binary:   "ollama".into(),
            mode:         CompletionMode::Buffered,
            timeout_secs: Some(120),
            temperature:  0.0,
        }
    }
}

/// Where the schema description given to the model comes from.
/// `description` wins over `file`; with neither, the database is introspected.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SchemaConfig {
    pub description: Option<String>,
    pub file:        Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SafetyConfig {
    pub policy: SafetyPolicy,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeliveryConfig {
    pub ack_text:              String,
    pub callback_timeout_secs: u64,
}
impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ack_text:              crate::delivery::DEFAULT_ACK_TEXT.into(),
            callback_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is unset
    pub level: String,
    /// Rolling log directory; defaults to <data_dir>/querybridge/logs
    pub dir:   Option<PathBuf>,
}
impl Default for LoggingConfig {
    fn default() -> Self { Self { level: "info".into(), dir: None } }
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let file = match path {
        Some(p) => config::File::from(p).required(true),
        None => config::File::with_name("querybridge").required(false),
    };
    let cfg = config::Config::builder()
        .add_source(file)
        .add_source(config::Environment::with_prefix("QUERYBRIDGE").separator("__"))
        .build()?;
    let mut app: AppConfig = cfg.try_deserialize()?;

    // Convenience: OLLAMA_HOST (the variable ollama itself reads)
    if let Ok(host) = std::env::var("OLLAMA_HOST") {
        if !host.is_empty() && std::env::var("QUERYBRIDGE__LLM__BASE_URL").is_err() {
            app.llm.base_url = if host.starts_with("http") { host } else { format!("http://{host}") };
        }
    }

    Ok(app)
}

pub fn default_config() -> AppConfig {
    AppConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_usable() {
        let cfg = default_config();
        assert_eq!(cfg.server.bind, "0.0.0.0:5000");
        assert_eq!(cfg.llm.backend, BackendKind::Http);
        assert_eq!(cfg.llm.mode, CompletionMode::Buffered);
        assert_eq!(cfg.safety.policy, SafetyPolicy::Denylist);
        assert!(cfg.schema.description.is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[llm]
backend = "cli"
model = "gemma3"
mode = "streamed"

[safety]
policy = "read_only"

[schema]
description = "- users(id, name)"
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.llm.backend, BackendKind::Cli);
        assert_eq!(cfg.llm.model, "gemma3");
        assert_eq!(cfg.llm.mode, CompletionMode::Streamed);
        assert_eq!(cfg.llm.cli_binary, "ollama");
        assert_eq!(cfg.safety.policy, SafetyPolicy::ReadOnly);
        assert_eq!(cfg.schema.description.as_deref(), Some("- users(id, name)"));
        assert_eq!(cfg.database.max_rows, 1_000);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/querybridge.toml"))).is_err());
    }
}
