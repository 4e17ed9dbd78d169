use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use slotdesk::config::AppConfig;
use slotdesk::db::{self, SqliteStore};
use slotdesk::handlers;
use slotdesk::services::ai::assistant::LlmAssistant;
use slotdesk::services::ai::groq::GroqProvider;
use slotdesk::services::ai::ollama::OllamaProvider;
use slotdesk::services::ai::LlmProvider;
use slotdesk::services::backup::JsonFileBackup;
use slotdesk::services::conversation;
use slotdesk::state::AppState;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = Arc::new(Mutex::new(db::init_db(&config.database_url)?));

    let llm: Box<dyn LlmProvider> = match config.llm_provider.as_str() {
        "groq" => {
            anyhow::ensure!(
                !config.groq_api_key.is_empty(),
                "GROQ_API_KEY must be set when LLM_PROVIDER=groq"
            );
            tracing::info!("using Groq LLM provider (model: {})", config.groq_model);
            Box::new(GroqProvider::new(
                config.groq_api_key.clone(),
                config.groq_model.clone(),
            ))
        }
        _ => {
            tracing::info!(
                "using Ollama LLM provider (url: {}, model: {})",
                config.ollama_url,
                config.ollama_model
            );
            Box::new(OllamaProvider::new(
                config.ollama_url.clone(),
                config.ollama_model.clone(),
            ))
        }
    };
    let assistant = Arc::new(LlmAssistant::new(llm));

    let state = Arc::new(AppState {
        db: Arc::clone(&conn),
        config: config.clone(),
        store: Box::new(SqliteStore::new(conn)),
        appointments_lock: tokio::sync::Mutex::new(()),
        backup: Box::new(JsonFileBackup::new(&config.backup_dir)),
        classifier: assistant.clone(),
        fallback: assistant,
        session_locks: Mutex::new(HashMap::new()),
    });

    let sweeper = Arc::clone(&state);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = conversation::sweep_sessions(&sweeper) {
                tracing::warn!(error = %e, "session sweep failed");
            }
        }
    });

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/chat", post(handlers::chat::chat))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
