//! Error types shared across the pipeline.
//!
//! Every failure inside a request is converted into one of these values at
//! the boundary where it happens; nothing here is allowed to take down the
//! task handling the request.
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// The oracle could not produce a completion.
#[derive(Error, Debug)]
pub enum GenerationFailed {
    /// Service not reachable or process could not be spawned.
    #[error("oracle unreachable: {0}")]
    Unreachable(String),

    #[error("oracle HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle process exited with {code:?}: {stderr}")]
    ProcessExit { code: Option<i32>, stderr: String },

    #[error("oracle did not answer within {0:?}")]
    Timeout(Duration),

    /// Reply arrived but could not be understood, or carried an error field.
    #[error("oracle protocol error: {0}")]
    Protocol(String),

    #[error("oracle stream interrupted: {0}")]
    Stream(String),
}

/// The database rejected or failed a statement.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database handle poisoned")]
    Poisoned,

    #[error("executor task failed: {0}")]
    Task(String),
}

/// Where a request failed. Kept distinct end-to-end so the caller can tell
/// the user what to do differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Generation,
    Safety,
    Execution,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Origin::Generation => "generation",
            Origin::Safety => "safety",
            Origin::Execution => "execution",
        })
    }
}

/// Failure of one pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no statement produced")]
    Generation(#[source] GenerationFailed),

    /// Oracle answered, but nothing in the answer looked like SQL.
    #[error("no statement produced")]
    ExtractionEmpty,

    #[error("forbidden operation")]
    SafetyRejected { statement: String },

    #[error("{0}")]
    ExecutionFailed(String),
}

impl PipelineError {
    pub fn origin(&self) -> Origin {
        match self {
            PipelineError::Generation(_) | PipelineError::ExtractionEmpty => Origin::Generation,
            PipelineError::SafetyRejected { .. } => Origin::Safety,
            PipelineError::ExecutionFailed(_) => Origin::Execution,
        }
    }

    /// Message shown to the person who asked the question.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Generation(_) | PipelineError::ExtractionEmpty => {
                "The model did not produce a usable query. Try rephrasing the question.".to_string()
            }
            PipelineError::SafetyRejected { .. } => {
                "The generated query was blocked: it contains a forbidden operation (DROP, DELETE, UPDATE, ALTER, TRUNCATE).".to_string()
            }
            PipelineError::ExecutionFailed(message) => {
                format!("The database rejected the generated query: {message}")
            }
        }
    }
}

/// Failure to post a result to the caller's callback address.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("callback request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("callback endpoint answered HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_distinct() {
        let generation = PipelineError::Generation(GenerationFailed::Timeout(Duration::from_secs(1)));
        let empty = PipelineError::ExtractionEmpty;
        let safety = PipelineError::SafetyRejected { statement: "DROP TABLE t".into() };
        let execution = PipelineError::ExecutionFailed("no such table: t".into());

        assert_eq!(generation.origin(), Origin::Generation);
        assert_eq!(empty.origin(), Origin::Generation);
        assert_eq!(safety.origin(), Origin::Safety);
        assert_eq!(execution.origin(), Origin::Execution);

        assert_eq!(generation.to_string(), "no statement produced");
        assert_eq!(safety.to_string(), "forbidden operation");
        assert_eq!(execution.to_string(), "no such table: t");
    }

    #[test]
    fn user_messages_differ_per_origin() {
        let a = PipelineError::ExtractionEmpty.user_message();
        let b = PipelineError::SafetyRejected { statement: String::new() }.user_message();
        let c = PipelineError::ExecutionFailed("boom".into()).user_message();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert!(c.contains("boom"));
    }

    #[test]
    fn origin_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Origin::Safety).unwrap(), "\"safety\"");
    }
}
