//! Process configuration, loaded from environment variables via `clap`'s
//! `env` feature (§6 "Configuration") and validated eagerly at startup so a
//! misconfigured deployment fails before accepting its first request.

use std::sync::Arc;

use clap::Parser;
use dg_protocols::Dialect;

#[derive(Debug, Parser)]
#[command(name = "dialect-gateway", about = "Bidirectional dialect-translating reverse proxy")]
pub struct GatewayConfig {
    /// Upstream base URL, e.g. https://api.openai.com
    #[arg(long, env = "GATEWAY_UPSTREAM_URL")]
    pub upstream_url: String,

    /// Bearer API key forwarded to the upstream, if set.
    #[arg(long, env = "GATEWAY_UPSTREAM_API_KEY")]
    pub upstream_api_key: Option<String>,

    /// Wire dialect the upstream speaks natively.
    #[arg(long, env = "GATEWAY_UPSTREAM_DIALECT", default_value = "oai")]
    pub upstream_dialect: String,

    #[arg(long, env = "GATEWAY_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    #[arg(long, env = "GATEWAY_REINJECT_ENABLED", default_value_t = true)]
    pub reinject_enabled: bool,

    #[arg(long, env = "GATEWAY_REINJECT_N_MSG", default_value_t = 20)]
    pub reinject_n_msg: usize,

    #[arg(long, env = "GATEWAY_REINJECT_N_TOK", default_value_t = 4000)]
    pub reinject_n_tok: usize,

    /// When true, retain native `tools`/`tool_choice` fields on the upstream
    /// wire in addition to the injected synthetic-call instructions.
    #[arg(long, env = "GATEWAY_PASS_TOOLS", default_value_t = false)]
    pub pass_tools: bool,

    #[arg(long, env = "GATEWAY_WINDOW_MARGIN_BYTES", default_value_t = 64)]
    pub window_margin_bytes: usize,

    #[arg(long, env = "GATEWAY_MAX_BUFFER_BYTES", default_value_t = 65536)]
    pub max_buffer_bytes: usize,

    #[arg(long, env = "GATEWAY_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("GATEWAY_UPSTREAM_URL must be an absolute http(s) URL: {0}")]
    InvalidUpstreamUrl(String),
    #[error("GATEWAY_UPSTREAM_DIALECT must be 'oai' or 'oll', got: {0}")]
    InvalidDialect(String),
}

impl GatewayConfig {
    pub fn load() -> Result<Arc<Self>, ConfigError> {
        let config = Self::parse();
        config.validate()?;
        Ok(Arc::new(config))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.upstream_url.starts_with("http://") || self.upstream_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUpstreamUrl(self.upstream_url.clone()));
        }
        self.upstream_dialect()?;
        Ok(())
    }

    pub fn upstream_dialect(&self) -> Result<Dialect, ConfigError> {
        self.upstream_dialect
            .parse()
            .map_err(|_| ConfigError::InvalidDialect(self.upstream_dialect.clone()))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}
