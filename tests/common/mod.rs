#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use url::Url;

use querybridge::delivery::CallbackPayload;
use querybridge::error::{DeliveryError, ExecutorError, GenerationFailed};
use querybridge::llm::{ndjson_fragments, CompletionBackend, CompletionMode, FragmentStream, LlmClient};
use querybridge::{CallbackTransport, ExecutionGateway, Pipeline, QuerySynthesizer, Row, SafetyPolicy, SqlExecutor, SqliteExecutor};

pub const SCHEMA: &str = "- users(id, name, email)";

/// What the fake oracle does when asked.
#[derive(Clone)]
pub enum Script {
    /// Buffered reply text.
    Reply(String),
    /// Raw NDJSON lines for the streamed path.
    Lines(Vec<String>),
    /// Never answers.
    Hang,
    /// Connection refused.
    Down,
}

pub struct ScriptedBackend {
    script: Script,
    pub calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self { script, calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, _model: &str, _prompt: &str) -> Result<String, GenerationFailed> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Reply(text) => Ok(text.clone()),
            Script::Lines(lines) => Ok(lines.join("\n")),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(GenerationFailed::Unreachable("hung".into()))
            }
            Script::Down => Err(GenerationFailed::Unreachable("connection refused".into())),
        }
    }

    async fn generate_stream(&self, model: &str, prompt: &str) -> Result<FragmentStream, GenerationFailed> {
        match &self.script {
            Script::Lines(lines) => {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let raw = stream::iter(lines.clone().into_iter().map(Ok));
                Ok(ndjson_fragments(raw).boxed())
            }
            _ => {
                let text = self.generate(model, prompt).await?;
                Ok(stream::once(async move { Ok(text) }).boxed())
            }
        }
    }
}

/// Real SQLite underneath, with a call counter on top.
pub struct CountingExecutor {
    inner: SqliteExecutor,
    calls: AtomicUsize,
}

impl CountingExecutor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlExecutor for CountingExecutor {
    async fn run(&self, sql: &str) -> Result<Vec<Row>, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.run(sql).await
    }
}

pub fn seeded_database() -> Arc<CountingExecutor> {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT);
         INSERT INTO users (id, name, email) VALUES (1, 'Ada', 'ada@example.com');
         INSERT INTO users (id, name, email) VALUES (2, 'Bob', NULL);",
    )
    .unwrap();
    Arc::new(CountingExecutor {
        inner: SqliteExecutor::from_connection(conn, 100),
        calls: AtomicUsize::new(0),
    })
}

pub struct Harness {
    pub pipeline: Arc<Pipeline>,
    pub backend: Arc<ScriptedBackend>,
    pub db: Arc<CountingExecutor>,
}

pub fn harness(script: Script, mode: CompletionMode, timeout: Option<Duration>) -> Harness {
    let backend = ScriptedBackend::new(script);
    let db = seeded_database();
    let client = LlmClient::new(backend.clone()).with_timeout(timeout);
    let synthesizer = QuerySynthesizer::new(client, "sqlcoder", mode);
    let gateway = ExecutionGateway::new(db.clone(), SafetyPolicy::Denylist);
    Harness {
        pipeline: Arc::new(Pipeline::new(synthesizer, gateway, SCHEMA)),
        backend,
        db,
    }
}

/// Callback transport that only records what it was asked to deliver.
#[derive(Default)]
pub struct RecordingCallback {
    pub delivered: Mutex<Vec<(Instant, Url, CallbackPayload)>>,
    pub fail: bool,
}

#[async_trait]
impl CallbackTransport for RecordingCallback {
    async fn deliver(&self, address: &Url, payload: &CallbackPayload) -> Result<(), DeliveryError> {
        self.delivered
            .lock()
            .unwrap()
            .push((Instant::now(), address.clone(), payload.clone()));
        if self.fail {
            return Err(DeliveryError::Status { status: 500, body: "callback endpoint down".into() });
        }
        Ok(())
    }
}

/// Serve `app` on an ephemeral local port.
pub async fn spawn_app(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
