use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_INSTRUCTIONS: &str = "You are an assistant that helps retrieve information \
about stablecoins, liquidity pools, and can perform internet searches. Do not assume or \
hallucinate and tell any on your own. Use the tools to get the information and answer the prompt.";

/// Main configuration structure for the assistant gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub openai: OpenAIConfig,
    pub polling: PollingConfig,
    pub data_sources: DataSourcesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAIConfig {
    /// Never read from the YAML file in practice; `OPENAI_API_KEY` wins.
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Reuse an existing assistant instead of creating one at startup.
    pub assistant_id: Option<String>,
    pub assistant_name: String,
    pub instructions: String,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            assistant_id: None,
            assistant_name: "Stablecoin and Internet Search Assistant".to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }
}

/// Backoff schedule used while waiting for a run to settle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub max_wait_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 250,
            max_interval_ms: 2_000,
            max_wait_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourcesConfig {
    pub stablecoins_url: String,
    pub pools_url: String,
    pub prices_url: String,
    pub search_url: String,
    pub timeout_secs: u64,
}

impl Default for DataSourcesConfig {
    fn default() -> Self {
        Self {
            stablecoins_url: "https://stablecoins.llama.fi/stablecoins?includePrices=true"
                .to_string(),
            pools_url: "https://yields.llama.fi/pools".to_string(),
            prices_url: "https://stablecoins.llama.fi/stablecoinprices".to_string(),
            search_url: "https://html.duckduckgo.com/html/".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides.
    /// Always returns a usable config; problems are logged.
    pub fn load() -> Self {
        let env_paths = ["../.env", ".env"];

        let mut env_loaded = false;
        for path in &env_paths {
            if dotenvy::from_path(path).is_ok() {
                tracing::info!("Loaded .env from: {}", path);
                env_loaded = true;
                break;
            }
        }

        if !env_loaded {
            tracing::warn!("No .env file found - continuing with env vars only");
        }

        let config_path =
            env::var("ASSISTANT_CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => match Self::from_yaml(&contents) {
                    Ok(config) => {
                        tracing::info!("Loaded configuration from {}", config_path);
                        config
                    }
                    Err(e) => {
                        tracing::error!(
                            "Failed to parse config file {}: {} - using defaults",
                            config_path,
                            e
                        );
                        Self::default()
                    }
                },
                Err(e) => {
                    tracing::error!(
                        "Failed to read config file {}: {} - using defaults",
                        config_path,
                        e
                    );
                    Self::default()
                }
            }
        } else {
            tracing::info!("Config file not found at {} - using defaults", config_path);
            Self::default()
        };

        config.apply_overrides(|key| env::var(key).ok());

        if let Err(e) = config.validate() {
            tracing::warn!("Config validation warnings: {} - continuing anyway", e);
        }

        config
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    /// Apply overrides from a key lookup (the process environment in production)
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("ASSISTANT_BIND") {
            self.server.bind = bind;
        }

        if let Some(api_key) = lookup("OPENAI_API_KEY") {
            self.openai.api_key = api_key;
        }
        if let Some(base_url) = lookup("OPENAI_BASE_URL") {
            self.openai.base_url = base_url;
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.openai.model = model;
        }
        if let Some(id) = lookup("ASSISTANT_ID").filter(|id| !id.trim().is_empty()) {
            self.openai.assistant_id = Some(id);
        }

        if let Some(secs) = lookup("ASSISTANT_POLL_MAX_WAIT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.polling.max_wait_secs = secs;
            }
        }
        if let Some(secs) = lookup("DATA_SOURCE_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.data_sources.timeout_secs = secs;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.openai.api_key.trim().is_empty() {
            return Err("OPENAI_API_KEY environment variable must be set".into());
        }
        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(format!("Invalid server bind address: {}", self.server.bind).into());
        }
        if self.data_sources.timeout_secs == 0 {
            return Err("data_sources.timeout_secs cannot be 0".into());
        }
        if self.polling.max_wait_secs == 0 {
            return Err("polling.max_wait_secs cannot be 0".into());
        }
        if self.polling.initial_interval_ms > self.polling.max_interval_ms {
            return Err(
                "polling.initial_interval_ms must not exceed polling.max_interval_ms".into(),
            );
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.server.bind.parse()
    }
}

impl DataSourcesConfig {
    /// Per-request timeout for every data-source call
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PollingConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}
