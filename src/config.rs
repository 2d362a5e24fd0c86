use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub llm_provider: String,
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
    pub functions_path: Option<String>,
    pub orchestrator: OrchestratorSettings,
    pub session_ttl_minutes: i64,
}

/// Bounds on a single conversational turn.
#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    /// Planning rounds allowed before the turn escalates to a human.
    pub max_iterations: usize,
    pub max_offered_slots: usize,
    pub backend_timeout: Duration,
    /// How many recent turns the extraction prompt sees.
    pub extraction_turns: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_iterations: 4,
            max_offered_slots: 3,
            backend_timeout: Duration::from_secs(10),
            extraction_turns: 6,
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = OrchestratorSettings::default();
        Self {
            port: parsed("PORT", 3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "frontdesk.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            llm_provider: env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string()),
            llm_api_key: env::var("LLM_API_KEY").unwrap_or_default(),
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string()),
            llm_model: env::var("LLM_MODEL")
                .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string()),
            ollama_url: env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            ollama_model: env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".to_string()),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_phone_number: env::var("TWILIO_PHONE_NUMBER").unwrap_or_default(),
            functions_path: env::var("FUNCTIONS_PATH").ok().filter(|p| !p.is_empty()),
            orchestrator: OrchestratorSettings {
                max_iterations: parsed("MAX_ITERATIONS", defaults.max_iterations),
                max_offered_slots: parsed("MAX_OFFERED_SLOTS", defaults.max_offered_slots),
                backend_timeout: Duration::from_secs(parsed("BACKEND_TIMEOUT_SECS", 10)),
                extraction_turns: parsed("EXTRACTION_TURNS", defaults.extraction_turns),
            },
            session_ttl_minutes: parsed("SESSION_TTL_MINUTES", 30),
        }
    }
}
