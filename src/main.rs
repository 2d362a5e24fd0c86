use std::sync::{Arc, Mutex};
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use frontdesk::config::AppConfig;
use frontdesk::db;
use frontdesk::handlers;
use frontdesk::services::ai::ollama::OllamaProvider;
use frontdesk::services::ai::openai::OpenAiProvider;
use frontdesk::services::ai::LlmProvider;
use frontdesk::services::backend::SqliteBackend;
use frontdesk::services::conversation::FrontDesk;
use frontdesk::services::dispatch::DispatchTable;
use frontdesk::services::messaging::twilio::TwilioSmsProvider;
use frontdesk::services::messaging::{LogOnlyMessaging, MessagingProvider};
use frontdesk::services::notifications::Notifier;
use frontdesk::services::tenant_config::TenantConfigCache;
use frontdesk::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;
    let backend = Arc::new(SqliteBackend::new(Arc::new(Mutex::new(conn))));

    let table = DispatchTable::load(config.functions_path.as_deref())?;
    tracing::info!(functions = table.list_available().len(), "dispatch table loaded");

    let llm: Arc<dyn LlmProvider> = match config.llm_provider.as_str() {
        "openai" => {
            anyhow::ensure!(!config.llm_api_key.is_empty(), "LLM_API_KEY must be set when LLM_PROVIDER=openai");
            tracing::info!("using OpenAI-compatible LLM provider ({}, model: {})", config.llm_base_url, config.llm_model);
            Arc::new(OpenAiProvider::new(
                config.llm_api_key.clone(),
                config.llm_base_url.clone(),
                config.llm_model.clone(),
            ))
        }
        _ => {
            tracing::info!("using Ollama LLM provider (url: {}, model: {})", config.ollama_url, config.ollama_model);
            Arc::new(OllamaProvider::new(config.ollama_url.clone(), config.ollama_model.clone()))
        }
    };

    let messaging: Arc<dyn MessagingProvider> = if config.twilio_account_sid.is_empty() {
        tracing::info!("no Twilio account configured, owner notifications go to the log");
        Arc::new(LogOnlyMessaging)
    } else {
        Arc::new(TwilioSmsProvider::new(
            config.twilio_account_sid.clone(),
            config.twilio_auth_token.clone(),
            config.twilio_phone_number.clone(),
        ))
    };

    let desk = FrontDesk::new(
        llm,
        backend.clone(),
        table,
        config.orchestrator.clone(),
        TenantConfigCache::new(backend.clone()),
        Notifier::new(messaging),
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        desk,
        backend,
    });

    let ttl = Duration::from_secs(config.session_ttl_minutes.max(1) as u64 * 60);
    let sweeper = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            sweeper.desk.sessions().expire_idle(ttl);
        }
    });

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
