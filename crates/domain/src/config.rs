//! Runtime configuration.
//!
//! Every option has a default; `Config::from_env()` overlays `LECTERN_*`
//! environment variables on top. There is no CLI.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        env_string("LECTERN_HOST", &mut cfg.server.host);
        env_parse("LECTERN_PORT", &mut cfg.server.port);
        env_parse(
            "LECTERN_MAX_CONCURRENT_REQUESTS",
            &mut cfg.server.max_concurrent_requests,
        );
        if let Ok(origins) = std::env::var("LECTERN_CORS_ORIGINS") {
            cfg.server.cors_allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_owned())
                .filter(|o| !o.is_empty())
                .collect();
        }

        env_string("LECTERN_STT_URL", &mut cfg.stt.ws_url);
        env_string("LECTERN_STT_API_KEY", &mut cfg.stt.api_key);
        env_string("LECTERN_STT_LANGUAGE", &mut cfg.stt.language);
        env_string("LECTERN_STT_ENCODING", &mut cfg.stt.encoding);
        env_parse("LECTERN_STT_SAMPLE_RATE", &mut cfg.stt.sample_rate);
        env_parse("LECTERN_STT_WORD_TIMESTAMPS", &mut cfg.stt.word_timestamps);
        env_parse(
            "LECTERN_STT_CONNECT_TIMEOUT_SECS",
            &mut cfg.stt.connect_timeout_secs,
        );

        env_string("LECTERN_LLM_BASE_URL", &mut cfg.llm.base_url);
        env_string("LECTERN_LLM_API_KEY", &mut cfg.llm.api_key);
        env_string("LECTERN_LLM_MODEL", &mut cfg.llm.model);
        env_parse("LECTERN_LLM_TIMEOUT_SECS", &mut cfg.llm.timeout_secs);

        if let Ok(path) = std::env::var("LECTERN_DB_PATH") {
            cfg.database.path = PathBuf::from(path);
        }

        cfg
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// In-flight request ceiling across the whole router.
    #[serde(default = "d_256")]
    pub max_concurrent_requests: usize,
    /// `["*"]` allows any origin.
    #[serde(default = "d_cors_origins")]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            max_concurrent_requests: d_256(),
            cors_allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream STT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "d_stt_url")]
    pub ws_url: String,
    /// Bearer token for the upstream `Authorization` header.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "d_language")]
    pub language: String,
    #[serde(default = "d_encoding")]
    pub encoding: String,
    #[serde(default = "d_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "d_true")]
    pub word_timestamps: bool,
    #[serde(default = "d_10")]
    pub connect_timeout_secs: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            ws_url: d_stt_url(),
            api_key: String::new(),
            language: d_language(),
            encoding: d_encoding(),
            sample_rate: d_sample_rate(),
            word_timestamps: true,
            connect_timeout_secs: d_10(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Any OpenAI-compatible chat-completions endpoint works here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_llm_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "d_model")]
    pub model: String,
    /// Soft per-call timeout; a timed-out call fails like any other error.
    #[serde(default = "d_30")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_llm_url(),
            api_key: String::new(),
            model: d_model(),
            timeout_secs: d_30(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Database
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "d_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: d_db_path() }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Env helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn env_string(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        *target = value;
    }
}

fn env_parse<T>(name: &str, target: &mut T)
where
    T: FromStr,
    T::Err: Display,
{
    if let Ok(raw) = std::env::var(name) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(e) => tracing::warn!(var = name, value = %raw, error = %e, "ignoring unparseable env var"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Default value helpers (serde)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8000
}
fn d_256() -> usize {
    256
}
fn d_cors_origins() -> Vec<String> {
    vec!["*".into()]
}
fn d_stt_url() -> String {
    "wss://waves-api.smallest.ai/api/v1/pulse/get_text".into()
}
fn d_language() -> String {
    "en".into()
}
fn d_encoding() -> String {
    "linear16".into()
}
fn d_sample_rate() -> u32 {
    16_000
}
fn d_true() -> bool {
    true
}
fn d_10() -> u64 {
    10
}
fn d_llm_url() -> String {
    "https://api.groq.com/openai/v1".into()
}
fn d_model() -> String {
    "llama-3.1-8b-instant".into()
}
fn d_30() -> u64 {
    30
}
fn d_db_path() -> PathBuf {
    PathBuf::from("./lectern.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.stt.sample_rate, 16_000);
        assert_eq!(cfg.stt.encoding, "linear16");
        assert!(cfg.stt.word_timestamps);
        assert_eq!(cfg.llm.model, "llama-3.1-8b-instant");
        assert_eq!(cfg.database.path, PathBuf::from("./lectern.db"));
        assert_eq!(cfg.server.cors_allowed_origins, vec!["*".to_string()]);
    }

    #[test]
    fn env_overrides_apply() {
        // One test mutates the environment; keeping every variable here
        // avoids races between parallel tests.
        std::env::set_var("LECTERN_PORT", "9100");
        std::env::set_var("LECTERN_STT_SAMPLE_RATE", "8000");
        std::env::set_var("LECTERN_LLM_MODEL", "llama-3.3-70b-versatile");
        std::env::set_var("LECTERN_STT_WORD_TIMESTAMPS", "false");
        std::env::set_var("LECTERN_CORS_ORIGINS", "http://localhost:5173, http://localhost:3000");

        let cfg = Config::from_env();
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.stt.sample_rate, 8000);
        assert_eq!(cfg.llm.model, "llama-3.3-70b-versatile");
        assert!(!cfg.stt.word_timestamps);
        assert_eq!(
            cfg.server.cors_allowed_origins,
            vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string()
            ]
        );

        std::env::remove_var("LECTERN_PORT");
        std::env::remove_var("LECTERN_STT_SAMPLE_RATE");
        std::env::remove_var("LECTERN_LLM_MODEL");
        std::env::remove_var("LECTERN_STT_WORD_TIMESTAMPS");
        std::env::remove_var("LECTERN_CORS_ORIGINS");
    }

    #[test]
    fn unparseable_env_values_keep_defaults() {
        std::env::set_var("LECTERN_STT_CONNECT_TIMEOUT_SECS", "soon");
        let cfg = Config::from_env();
        assert_eq!(cfg.stt.connect_timeout_secs, 10);
        std::env::remove_var("LECTERN_STT_CONNECT_TIMEOUT_SECS");
    }
}
