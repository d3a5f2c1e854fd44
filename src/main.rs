use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use querybridge::config::{self, AppConfig, BackendKind, SchemaConfig};
use querybridge::delivery::{CallbackPayload, DeferredDelivery, HttpCallback};
use querybridge::llm::{CompletionBackend, LlmClient};
use querybridge::ollama::{OllamaCli, OllamaHttp};
use querybridge::server::{self, AppState};
use querybridge::{logging, report, sanitize};
use querybridge::{ExecutionGateway, Pipeline, QuerySynthesizer, SafetyPolicy, SqliteExecutor};

#[derive(Parser)]
#[command(name = "querybridge", version)]
#[command(about = "Ask a SQLite database in plain language: local LLM text-to-SQL behind a safety gate")]
struct Cli {
    /// Config file (TOML/YAML/JSON). Defaults to ./querybridge.* if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server (/query, /slack, /health)
    Serve {
        #[arg(long)] bind: Option<String>,
    },

    /// Ask a single question and print the result
    Ask {
        question: String,
        /// Print the callback payload as JSON instead of a table
        #[arg(long)] json: bool,
    },

    /// Show what the sanitizer extracts from some text and whether it would run
    Check {
        text: String,
    },

    /// Print the schema description given to the model
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let (cfg, load_error) = match config::load_config(cli.config.as_deref()) {
        Ok(cfg) => (cfg, None),
        Err(e) if cli.config.is_some() => return Err(e.context("cannot load config file")),
        Err(e) => (config::default_config(), Some(e)),
    };
    logging::init_logging(&cfg.logging);
    if let Some(e) = load_error {
        warn!("Config load failed ({}), using defaults", e);
    }

    match cli.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
            serve(&cfg, &bind).await?;
        }

        Command::Ask { question, json } => {
            let (pipeline, _db) = build_pipeline(&cfg).await?;
            let answer = pipeline.answer(&question).await;

            if json {
                let payload = CallbackPayload::from_answer(answer);
                println!("{}", serde_json::to_string_pretty(&payload)?);
                return Ok(());
            }

            println!();
            println!("SQL: {}", answer.sql.as_deref().unwrap_or("(none)"));
            println!();
            match &answer.result {
                Ok(rows) => println!("{}", report::render_table(rows, 50)),
                Err(e) => anyhow::bail!("[{}] {}", e.origin(), e.user_message()),
            }
        }

        Command::Check { text } => {
            let extracted = sanitize::extract_statement(&text);
            let policy = cfg.safety.policy;
            if extracted.is_empty() {
                println!("Extracted: (nothing)");
            } else {
                println!("Extracted: {}", extracted);
            }
            println!("Denylist:  {}", if sanitize::is_safe(&extracted) { "pass" } else { "FORBIDDEN" });
            println!("Policy:    {:?} → {}", policy, policy_verdict(policy, &extracted));
        }

        Command::Schema => {
            let db = open_database(&cfg)?;
            println!("{}", resolve_schema(&cfg.schema, &db).await?);
        }
    }
    Ok(())
}

/// What the gateway would do with an extracted statement.
fn policy_verdict(policy: SafetyPolicy, extracted: &str) -> &'static str {
    if extracted.trim().is_empty() {
        "nothing to execute"
    } else if policy.permits(extracted) {
        "would execute"
    } else {
        "blocked"
    }
}

fn open_database(cfg: &AppConfig) -> Result<SqliteExecutor> {
    SqliteExecutor::open(&cfg.database.path, cfg.database.max_rows)
        .with_context(|| format!("cannot open database {}", cfg.database.path.display()))
}

async fn resolve_schema(cfg: &SchemaConfig, db: &SqliteExecutor) -> Result<String> {
    if let Some(description) = cfg.description.as_ref().filter(|d| !d.trim().is_empty()) {
        return Ok(description.clone());
    }
    if let Some(path) = &cfg.file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("cannot read schema file {}", path.display()));
    }
    let described = db.describe().await.context("cannot introspect database schema")?;
    if described.is_empty() {
        warn!("Database has no tables; the model will be guessing");
    }
    Ok(described)
}

async fn build_pipeline(cfg: &AppConfig) -> Result<(Arc<Pipeline>, Arc<SqliteExecutor>)> {
    let db = Arc::new(open_database(cfg)?);
    let schema = resolve_schema(&cfg.schema, &db).await?;

    let backend: Arc<dyn CompletionBackend> = match cfg.llm.backend {
        BackendKind::Http => Arc::new(OllamaHttp::new(&cfg.llm.base_url, cfg.llm.temperature)),
        BackendKind::Cli => Arc::new(OllamaCli::new(&cfg.llm.cli_binary)),
    };
    let client = LlmClient::new(backend).with_timeout(cfg.llm.timeout_secs.map(Duration::from_secs));
    let synthesizer = QuerySynthesizer::new(client, &cfg.llm.model, cfg.llm.mode);
    let gateway = ExecutionGateway::new(db.clone(), cfg.safety.policy);

    info!("Model: {} ({:?} mode), safety policy: {:?}", cfg.llm.model, cfg.llm.mode, cfg.safety.policy);
    Ok((Arc::new(Pipeline::new(synthesizer, gateway, schema)), db))
}

async fn serve(cfg: &AppConfig, bind: &str) -> Result<()> {
    let (pipeline, db) = build_pipeline(cfg).await?;

    let transport = Arc::new(HttpCallback::new(Duration::from_secs(cfg.delivery.callback_timeout_secs))?);
    let delivery = Arc::new(DeferredDelivery::new(pipeline.clone(), transport, cfg.delivery.ack_text.clone()));
    let app = server::router(AppState::new(pipeline, delivery.clone()));

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("cannot bind {bind}"))?;
    info!("🚀 Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    delivery.drain().await;
    drop(db);
    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            warn!("Cannot listen for Ctrl-C ({}); running until killed", e);
            std::future::pending::<()>().await;
        }
    }
}
