//! synthesizer.rs: question + schema → one candidate SQL statement.
//!
//! The rule block asks the model not to emit destructive statements. That
//! instruction is advisory only; the gateway's safety policy is what actually
//! keeps them away from the database.

use tracing::{debug, info, warn};

use crate::error::GenerationFailed;
use crate::llm::{CompletionMode, LlmClient};
use crate::sanitize;

/// Longest question (in chars) placed into a prompt.
pub const MAX_QUESTION_CHARS: usize = 2_000;

const RULES: &str = "Rules:
- Answer with a single valid SQL query and nothing else.
- No comments, no explanations, no quotes around the query.
- No destructive operations (DROP, DELETE, UPDATE, ALTER, TRUNCATE).
Give the query.";

/// Prompt sent to the oracle: schema, quoted question, rule block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    pub fn build(schema: &str, question: &str) -> Self {
        Prompt(format!(
            "You are an SQL generator. Here is the database schema:\n{}\n\nQuestion: \"{}\"\n\n{}",
            schema.trim(),
            quote_question(question),
            RULES
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Keep the question on one line and unable to close its own quotes, so it
/// cannot pose as part of the rule block.
fn quote_question(question: &str) -> String {
    let bounded = sanitize::truncate_to_chars(question.trim(), MAX_QUESTION_CHARS);
    bounded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('"', "'")
}

/// Outcome of one synthesis.
#[derive(Debug)]
pub enum Candidate {
    /// A single-line statement starting with a recognised keyword. Not yet
    /// safety-checked.
    Statement(String),
    /// The oracle answered but no statement could be extracted.
    Empty,
    /// The oracle could not be reached or failed.
    Failed(GenerationFailed),
}

impl Candidate {
    /// The statement text, or `""` when there is none.
    pub fn sql(&self) -> &str {
        match self {
            Candidate::Statement(sql) => sql,
            Candidate::Empty | Candidate::Failed(_) => "",
        }
    }
}

pub struct QuerySynthesizer {
    client: LlmClient,
    model: String,
    mode: CompletionMode,
}

impl QuerySynthesizer {
    pub fn new(client: LlmClient, model: impl Into<String>, mode: CompletionMode) -> Self {
        Self { client, model: model.into(), mode }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn synthesize(&self, question: &str, schema: &str) -> Candidate {
        let prompt = Prompt::build(schema, question);

        let raw = match self.client.complete(&self.model, prompt.as_str(), self.mode).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("SQL generation failed ({}): {}", self.client.backend_name(), e);
                return Candidate::Failed(e);
            }
        };
        debug!("Raw completion: {:?}", raw.as_str());

        let extracted = sanitize::extract_statement(raw.as_str());
        let sql = sanitize::to_single_line(sanitize::first_statement(&extracted));
        if sql.is_empty() {
            info!("No SQL statement found in model output for: {}", question);
            return Candidate::Empty;
        }

        info!("Generated SQL: {}", sql);
        Candidate::Statement(sql)
    }
}
