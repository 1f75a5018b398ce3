//! Carga y gestión de configuración de la aplicación (PageIndex + LLM).

use std::{env, fmt, path::PathBuf, time::Duration};
use anyhow::{anyhow, Context, Result};

use crate::pageindex::PollPolicy;

pub const DEFAULT_PAGEINDEX_BASE_URL: &str = "https://api.pageindex.ai";

/// Configuración completa de la aplicación.
#[derive(Clone)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub pageindex_api_key: String,
    pub pageindex_base_url: String,
    pub server_addr: String,

    pub llm_chat_model: String,
    pub data_dir: PathBuf,
    pub poll_policy: PollPolicy,
    pub open_browser: bool,
}

// Las claves nunca deben aparecer en logs.
impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("openai_api_key", &"<redacted>")
            .field("pageindex_api_key", &"<redacted>")
            .field("pageindex_base_url", &self.pageindex_base_url)
            .field("server_addr", &self.server_addr)
            .field("llm_chat_model", &self.llm_chat_model)
            .field("data_dir", &self.data_dir)
            .field("poll_policy", &self.poll_policy)
            .field("open_browser", &self.open_browser)
            .finish()
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero leyendo de cualquier fuente clave → valor.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("Falta {key} en el entorno"))
        };
        let or_default = |key: &str, default: &str| {
            lookup(key).unwrap_or_else(|| default.to_string())
        };

        let openai_api_key = required("OPENAI_API_KEY")?;
        let pageindex_api_key = required("PAGEINDEX_API_KEY")?;
        let pageindex_base_url = or_default("PAGEINDEX_BASE_URL", DEFAULT_PAGEINDEX_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        let server_addr = or_default("SERVER_ADDR", "127.0.0.1:3322");
        let llm_chat_model = or_default("LLM_CHAT_MODEL", "gpt-3.5-turbo");
        let data_dir = PathBuf::from(or_default("DATA_DIR", "data"));

        let interval_ms: u64 = or_default("POLL_INTERVAL_MS", "1000")
            .parse()
            .context("POLL_INTERVAL_MS debe ser un entero (milisegundos)")?;
        let max_attempts: u32 = or_default("POLL_MAX_ATTEMPTS", "20")
            .parse()
            .context("POLL_MAX_ATTEMPTS debe ser un entero")?;
        if max_attempts == 0 {
            return Err(anyhow!("POLL_MAX_ATTEMPTS debe ser al menos 1"));
        }

        let open_browser = match or_default("OPEN_BROWSER", "true").to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            other => return Err(anyhow!("Valor no válido para OPEN_BROWSER: {other}")),
        };

        Ok(Self {
            openai_api_key,
            pageindex_api_key,
            pageindex_base_url,
            server_addr,
            llm_chat_model,
            data_dir,
            poll_policy: PollPolicy::new(Duration::from_millis(interval_ms), max_attempts),
            open_browser,
        })
    }
}
