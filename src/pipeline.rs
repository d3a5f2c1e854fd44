//! pipeline.rs: question → synthesizer → gateway → answer.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, info_span, Instrument};

use crate::database::Row;
use crate::error::{Origin, PipelineError};
use crate::gateway::{ExecutionGateway, ExecutionResult};
use crate::synthesizer::{Candidate, QuerySynthesizer};

pub struct Pipeline {
    synthesizer: QuerySynthesizer,
    gateway: ExecutionGateway,
    schema: Arc<str>,
}

/// Everything a caller needs to render the outcome of one question.
#[derive(Debug)]
pub struct Answer {
    pub question: String,
    /// Executed or rejected statement; `None` when nothing was generated.
    pub sql: Option<String>,
    pub result: ExecutionResult,
}

/// Wire form of a failure: `{origin, message}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub origin: Origin,
    pub message: String,
}

impl From<&PipelineError> for ErrorBody {
    fn from(e: &PipelineError) -> Self {
        Self { origin: e.origin(), message: e.to_string() }
    }
}

impl Answer {
    pub fn rows(&self) -> Option<&[Row]> {
        self.result.as_ref().ok().map(Vec::as_slice)
    }

    pub fn error(&self) -> Option<&PipelineError> {
        self.result.as_ref().err()
    }
}

impl Pipeline {
    pub fn new(synthesizer: QuerySynthesizer, gateway: ExecutionGateway, schema: impl Into<Arc<str>>) -> Self {
        Self {
            synthesizer,
            gateway,
            schema: schema.into(),
        }
    }

    /// Run one question end to end. Never fails; failures live in `Answer::result`.
    pub async fn answer(&self, question: &str) -> Answer {
        let started = Instant::now();
        let span = info_span!("pipeline", model = self.synthesizer.model());

        async {
            info!("Question: {}", question);
            let candidate = self.synthesizer.synthesize(question, &self.schema).await;
            let sql = match &candidate {
                Candidate::Statement(sql) => Some(sql.clone()),
                Candidate::Empty | Candidate::Failed(_) => None,
            };

            let result = self.gateway.execute(candidate).await;
            match &result {
                Ok(rows) => info!("Answered with {} row(s) in {:?}", rows.len(), started.elapsed()),
                Err(e) => info!("Answered with {} error in {:?}: {}", e.origin(), started.elapsed(), e),
            }

            Answer {
                question: question.to_string(),
                sql,
                result,
            }
        }
        .instrument(span)
        .await
    }
}
