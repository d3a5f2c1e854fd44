//! server.rs: HTTP front door.
//!
//! - `POST /query`  JSON `{question, callback_address?}`
//! - `POST /slack`  Slack slash-command form (`text`, `response_url`)
//! - `GET  /health`
//!
//! Without a callback address the whole pipeline runs before responding.
//! With one, the caller gets the fixed acknowledgment and the answer is
//! delivered later by `DeferredDelivery`; the background work is released by
//! the ack body itself, after its text has been handed to the connection.

use std::sync::Arc;

use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::database::Row;
use crate::delivery::DeferredDelivery;
use crate::error::{Origin, PipelineError};
use crate::pipeline::Pipeline;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    delivery: Arc<DeferredDelivery>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, delivery: Arc<DeferredDelivery>) -> Self {
        Self { pipeline, delivery }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/query", post(query))
        .route("/slack", post(slack))
        .route("/health", get(health))
        .with_state(state)
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: Option<String>,
    #[serde(alias = "callbackAddress")]
    pub callback_address: Option<String>,
}

/// Fields Slack sends with a slash command; the rest are ignored.
#[derive(Debug, Deserialize)]
pub struct SlackCommand {
    pub text: Option<String>,
    pub response_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QueryResponse {
    Ok {
        sql: String,
        result: Vec<Row>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        origin: Option<Origin>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sql: Option<String>,
    },
}

/// Rejected before any pipeline work.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("{0}")]
    Malformed(String),
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        warn!("Rejected request: {}", self);
        let body = QueryResponse::Error {
            message: self.to_string(),
            origin: None,
            sql: None,
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

fn status_for(error: &PipelineError) -> StatusCode {
    match error.origin() {
        Origin::Generation => StatusCode::BAD_GATEWAY,
        Origin::Safety => StatusCode::FORBIDDEN,
        Origin::Execution => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Response, RequestError> {
    let Json(req) = body.map_err(|e| RequestError::Malformed(format!("Invalid JSON body: {}", e.body_text())))?;
    dispatch(&state, req.question, req.callback_address).await
}

async fn slack(
    State(state): State<AppState>,
    body: Result<Form<SlackCommand>, FormRejection>,
) -> Result<Response, RequestError> {
    let Form(cmd) = body.map_err(|e| RequestError::Malformed(format!("Invalid form body: {}", e.body_text())))?;
    dispatch(&state, cmd.text, cmd.response_url).await
}

async fn dispatch(
    state: &AppState,
    question: Option<String>,
    callback: Option<String>,
) -> Result<Response, RequestError> {
    let question = question
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| RequestError::Malformed("The request does not contain a question.".into()))?;

    let callback = callback
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .map(|c| parse_callback(&c))
        .transpose()?;

    match callback {
        Some(address) => {
            let pending = state.delivery.accept(question, address);
            info!(ticket = pending.ticket_id, "Acknowledging deferred request");
            let body = pending.into_body(state.delivery.ack_text());
            Ok((StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response())
        }
        None => Ok(synchronous(state, &question).await),
    }
}

fn parse_callback(raw: &str) -> Result<Url, RequestError> {
    let url = Url::parse(raw).map_err(|e| RequestError::Malformed(format!("Invalid callback address: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(RequestError::Malformed(format!("Unsupported callback scheme: {other}"))),
    }
}

async fn synchronous(state: &AppState, question: &str) -> Response {
    let answer = state.pipeline.answer(question).await;
    match answer.result {
        Ok(rows) => {
            let body = QueryResponse::Ok {
                sql: answer.sql.unwrap_or_default(),
                result: rows,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            let body = QueryResponse::Error {
                message: e.to_string(),
                origin: Some(e.origin()),
                sql: answer.sql,
            };
            (status_for(&e), Json(body)).into_response()
        }
    }
}
