//! querybridge: natural-language questions answered with SQL generated by a
//! local LLM, gated by a safety policy, executed against SQLite, and returned
//! over HTTP directly or through a deferred callback (Slack style).

pub mod config;
pub mod database;
pub mod delivery;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod logging;
pub mod ollama;
pub mod pipeline;
pub mod report;
pub mod sanitize;
pub mod server;
pub mod synthesizer;

pub use database::{Row, SqlExecutor, SqliteExecutor};
pub use delivery::{CallbackPayload, CallbackTransport, DeferredDelivery, DeliveryState, HttpCallback};
pub use error::{DeliveryError, ExecutorError, GenerationFailed, Origin, PipelineError};
pub use gateway::{ExecutionGateway, ExecutionResult};
pub use llm::{CompletionBackend, CompletionMode, LlmClient, RawCompletion};
pub use pipeline::{Answer, Pipeline};
pub use sanitize::{extract_statement, is_safe, SafetyPolicy};
pub use synthesizer::{Candidate, Prompt, QuerySynthesizer};
