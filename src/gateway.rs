//! gateway.rs: the last gate before the database.
//!
//! Every candidate goes through the safety policy here, whatever the prompt
//! asked the model to do. A rejected statement never reaches the executor.

use std::sync::Arc;

use tracing::{info, warn};

use crate::database::{Row, SqlExecutor};
use crate::error::PipelineError;
use crate::sanitize::SafetyPolicy;
use crate::synthesizer::Candidate;

/// Rows, or a failure tagged with its origin.
pub type ExecutionResult = Result<Vec<Row>, PipelineError>;

pub struct ExecutionGateway {
    executor: Arc<dyn SqlExecutor>,
    policy: SafetyPolicy,
}

impl ExecutionGateway {
    pub fn new(executor: Arc<dyn SqlExecutor>, policy: SafetyPolicy) -> Self {
        Self { executor, policy }
    }

    pub async fn execute(&self, candidate: Candidate) -> ExecutionResult {
        let sql = match candidate {
            Candidate::Failed(cause) => return Err(PipelineError::Generation(cause)),
            Candidate::Empty => return Err(PipelineError::ExtractionEmpty),
            Candidate::Statement(sql) if sql.trim().is_empty() => return Err(PipelineError::ExtractionEmpty),
            Candidate::Statement(sql) => sql,
        };

        if !self.policy.permits(&sql) {
            warn!("Blocked statement ({:?} policy): {}", self.policy, sql);
            return Err(PipelineError::SafetyRejected { statement: sql });
        }

        match self.executor.run(&sql).await {
            Ok(rows) => {
                info!("Statement returned {} row(s)", rows.len());
                Ok(rows)
            }
            Err(e) => {
                warn!("Execution failed: {} | query: {}", e, sql);
                Err(PipelineError::ExecutionFailed(e.to_string()))
            }
        }
    }
}
