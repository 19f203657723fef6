//! Runtime configuration, read from the environment (and `.env` in binaries).

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub gemini_model: String,
    /// One sub-directory of JSON fixtures per client id.
    pub data_path: PathBuf,
    /// Where rendered prep pack reports are written.
    pub output_dir: PathBuf,
    pub product_catalog_path: PathBuf,
    pub regulations_path: PathBuf,
    pub agent_timeout: Duration,
    pub session_ttl: Duration,
    pub database_url: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// Display name → client id, e.g. `SOTUPLAST=ATB-SME-001`.
    pub client_aliases: Vec<(String, String)>,
    pub api_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            data_path: PathBuf::from("data/fake_clients"),
            output_dir: PathBuf::from("outputs"),
            product_catalog_path: PathBuf::from("data/product_catalog.json"),
            regulations_path: PathBuf::from("data/bct_knowledge_base.json"),
            agent_timeout: Duration::from_secs(60),
            session_ttl: Duration::from_secs(3600),
            database_url: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
            client_aliases: Vec::new(),
            api_port: 5000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let agent_timeout = match non_empty("AGENT_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number(&raw, "AGENT_TIMEOUT_SECS")?),
            None => defaults.agent_timeout,
        };

        let session_ttl = match non_empty("SESSION_TTL_SECS") {
            Some(raw) => Duration::from_secs(parse_number(&raw, "SESSION_TTL_SECS")?),
            None => defaults.session_ttl,
        };

        let api_port = match non_empty("PORT").or_else(|| non_empty("API_PORT")) {
            Some(raw) => parse_number(&raw, "PORT")? as u16,
            None => defaults.api_port,
        };

        Ok(Self {
            gemini_api_key: non_empty("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: non_empty("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            data_path: non_empty("DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_path),
            output_dir: non_empty("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            product_catalog_path: non_empty("PRODUCT_CATALOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.product_catalog_path),
            regulations_path: non_empty("REGULATIONS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.regulations_path),
            agent_timeout,
            session_ttl,
            database_url: non_empty("DATABASE_URL").or_else(|| non_empty("POSTGRES_URL")),
            telegram_bot_token: non_empty("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: non_empty("TELEGRAM_CHAT_ID"),
            client_aliases: non_empty("CLIENT_ALIASES")
                .map(|raw| parse_aliases(&raw))
                .unwrap_or_default(),
            api_port,
        })
    }

    /// Fails when no Gemini key is configured.
    pub fn require_api_key(&self) -> Result<&str> {
        if self.gemini_api_key.is_empty() || self.gemini_api_key == "your_gemini_api_key_here" {
            return Err(OrchestrationError::Config(
                "GEMINI_API_KEY is not set. Add it to your .env file.".to_string(),
            ));
        }
        Ok(&self.gemini_api_key)
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number(raw: &str, key: &str) -> Result<u64> {
    raw.parse::<u64>()
        .map_err(|e| OrchestrationError::Config(format!("{} must be a number: {}", key, e)))
}

/// Parse `NAME=ID,NAME2=ID2`. Malformed pairs are skipped.
pub fn parse_aliases(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (name, id) = pair.split_once('=')?;
            let (name, id) = (name.trim(), id.trim());
            if name.is_empty() || id.is_empty() {
                None
            } else {
                Some((name.to_string(), id.to_string()))
            }
        })
        .collect()
}
