//! delivery.rs: deferred two-phase responses.
//!
//! A caller with a short timeout (Slack gives slash commands three seconds)
//! gets a fixed acknowledgment straight away. The real answer is computed in
//! the background and posted to the callback address the caller supplied.
//!
//! Per request: `Received → Acknowledged → Delivered | DeliveryFailed`.
//! The background task does no pipeline work until the acknowledgment has
//! been released, and a failed callback never touches the acknowledgment
//! that was already sent.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{error, info, info_span, warn, Instrument};
use url::Url;

use crate::database::Row;
use crate::error::DeliveryError;
use crate::pipeline::{Answer, ErrorBody, Pipeline};
use crate::report;

pub const DEFAULT_ACK_TEXT: &str = "⏳ Working on it, the answer will follow shortly.";

/// Rows rendered into the human-readable part of a callback message.
const MESSAGE_ROWS: usize = 20;

/// Body posted to the callback address.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackPayload {
    pub response_type: &'static str,
    pub text: String,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl CallbackPayload {
    pub fn from_answer(answer: Answer) -> Self {
        let text = report::render_message(&answer, MESSAGE_ROWS);
        let (rows, error) = match &answer.result {
            Ok(rows) => (Some(rows.clone()), None),
            Err(e) => (None, Some(ErrorBody::from(e))),
        };
        Self {
            response_type: "in_channel",
            text,
            question: answer.question,
            sql: answer.sql,
            rows,
            error,
        }
    }
}

/// Outbound leg of a deferred response.
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    async fn deliver(&self, address: &Url, payload: &CallbackPayload) -> Result<(), DeliveryError>;
}

/// Posts the payload as JSON.
pub struct HttpCallback {
    http: Client,
}

impl HttpCallback {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl CallbackTransport for HttpCallback {
    async fn deliver(&self, address: &Url, payload: &CallbackPayload) -> Result<(), DeliveryError> {
        let resp = self.http.post(address.clone()).json(payload).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::Status {
                status,
                body: body.chars().take(300).collect(),
            });
        }
        Ok(())
    }
}

/// One accepted request waiting for its answer.
#[derive(Debug, Clone)]
pub struct DeliveryTicket {
    pub id: u64,
    pub question: String,
    pub callback: Url,
    pub received_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    Acknowledged,
    Delivered,
    DeliveryFailed(String),
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Delivered | DeliveryState::DeliveryFailed(_))
    }
}

/// Handle returned by `accept`. Dropping it without acknowledging still
/// releases the task, so every ticket reaches a terminal state.
pub struct PendingAck {
    pub ticket_id: u64,
    release: oneshot::Sender<()>,
    task: JoinHandle<DeliveryState>,
}

impl PendingAck {
    /// Mark the acknowledgment as sent and let the background work start.
    pub fn acknowledge(self) -> JoinHandle<DeliveryState> {
        let _ = self.release.send(());
        self.task
    }

    /// Response body carrying the acknowledgment text. The task is released
    /// only when the body is polled past that text, i.e. once the server has
    /// taken the ack bytes for the connection. Dropping the body unpolled
    /// (caller gone) drops the handle instead.
    pub fn into_body(self, text: impl Into<String>) -> Body {
        let text: String = text.into();
        let ack = stream::once(async move { Some(Bytes::from(text)) });
        let release = stream::once(async move {
            drop(self.acknowledge());
            None
        });
        let chunks = ack
            .chain(release)
            .filter_map(|chunk| async move { chunk.map(Ok::<_, Infallible>) });
        Body::from_stream(chunks)
    }
}

pub struct DeferredDelivery {
    pipeline: Arc<Pipeline>,
    transport: Arc<dyn CallbackTransport>,
    tracker: TaskTracker,
    next_id: AtomicU64,
    ack_text: String,
}

impl DeferredDelivery {
    pub fn new(pipeline: Arc<Pipeline>, transport: Arc<dyn CallbackTransport>, ack_text: impl Into<String>) -> Self {
        Self {
            pipeline,
            transport,
            tracker: TaskTracker::new(),
            next_id: AtomicU64::new(1),
            ack_text: ack_text.into(),
        }
    }

    /// Fixed text sent back to the caller as the acknowledgment.
    pub fn ack_text(&self) -> &str {
        &self.ack_text
    }

    /// Register a request. Returns immediately; no pipeline work has started.
    pub fn accept(&self, question: impl Into<String>, callback: Url) -> PendingAck {
        let ticket = DeliveryTicket {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            question: question.into(),
            callback,
            received_at: Instant::now(),
        };
        let ticket_id = ticket.id;
        info!(ticket = ticket_id, state = ?DeliveryState::Received, "Deferred request: {}", ticket.question);

        let (release, released) = oneshot::channel();
        let pipeline = Arc::clone(&self.pipeline);
        let transport = Arc::clone(&self.transport);
        let span = info_span!("delivery", ticket = ticket_id);

        let task = self
            .tracker
            .spawn(run_ticket(ticket, released, pipeline, transport).instrument(span));

        PendingAck { ticket_id, release, task }
    }

    /// Stop accepting and wait for in-flight deliveries to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        if !self.tracker.is_empty() {
            info!("Waiting for {} in-flight deliveries", self.tracker.len());
        }
        self.tracker.wait().await;
    }
}

async fn run_ticket(
    ticket: DeliveryTicket,
    released: oneshot::Receiver<()>,
    pipeline: Arc<Pipeline>,
    transport: Arc<dyn CallbackTransport>,
) -> DeliveryState {
    // A dropped sender means the ack handle went away; the delivery is
    // independent of it, so carry on either way.
    match released.await {
        Ok(()) => info!(state = ?DeliveryState::Acknowledged, "Acknowledged after {:?}", ticket.received_at.elapsed()),
        Err(_) => warn!("Acknowledgment was never sent (caller gone); answering anyway"),
    }

    let answer = pipeline.answer(&ticket.question).await;
    let payload = CallbackPayload::from_answer(answer);

    let state = match transport.deliver(&ticket.callback, &payload).await {
        Ok(()) => DeliveryState::Delivered,
        Err(e) => DeliveryState::DeliveryFailed(e.to_string()),
    };

    match &state {
        DeliveryState::Delivered => info!(state = ?state, "Delivered to {} in {:?}", ticket.callback, ticket.received_at.elapsed()),
        DeliveryState::DeliveryFailed(reason) => error!(state = "DeliveryFailed", "Callback to {} failed: {}", ticket.callback, reason),
        other => warn!("Unexpected non-terminal state {:?}", other),
    }
    state
}
