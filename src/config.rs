//! Client configuration.
//!
//! Sources, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. YAML file (`--config` / `CONFIG_FILE`, else `./chatstream.yaml` if present)
//! 3. `CHATSTREAM_`-prefixed environment, `__` between sections
//!    (e.g. `CHATSTREAM_ENDPOINT__URL`)
//! 4. CLI flags and their dedicated environment variables

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::identity::{CachedProvider, IdentityProvider, StaticToken, TokenFile};
use crate::session::SessionOptions;
use crate::transport::WebSocketTransport;
use crate::wire::Terminators;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// WebSocket endpoint of the assistant backend
    #[arg(long, env = "CHAT_ENDPOINT_URL")]
    pub endpoint: Option<String>,

    /// Bearer token used to open the connection
    #[arg(long, env = "CHAT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// File holding the bearer token, re-read on every connect
    #[arg(long, env = "CHAT_TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    pub endpoint: EndpointConfig,
    pub identity: IdentityConfig,
    pub session: SessionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EndpointConfig {
    pub url: String,
    /// Query parameter that carries the credential.
    pub token_param: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    #[serde(default)]
    pub token: Option<String>,
    /// Takes precedence over `token` when set.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    pub refresh_skew_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Extra terminator sentinels besides `[DONE]`.
    pub terminators: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub json: bool,
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("endpoint.url", "ws://127.0.0.1:3000/ws")?
            .set_default("endpoint.token_param", "token")?
            .set_default("identity.refresh_skew_secs", 60)?
            .set_default("session.terminators", Vec::<String>::new())?
            .set_default("log.json", false)?;

        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("chatstream").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("CHATSTREAM")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("session.terminators")
                .try_parsing(true),
        );

        if let Some(endpoint) = cli.endpoint {
            builder = builder.set_override("endpoint.url", endpoint)?;
        }
        if let Some(token) = cli.token {
            builder = builder.set_override("identity.token", token)?;
        }
        if let Some(path) = cli.token_file {
            builder = builder.set_override("identity.token_file", path.to_string_lossy().into_owned())?;
        }
        if let Some(json) = cli.log_json {
            builder = builder.set_override("log.json", json)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.endpoint_url()?;
        Ok(cfg)
    }

    /// Parsed endpoint address.
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(self.endpoint.url.trim())
            .map_err(|e| ConfigError::Message(format!("invalid endpoint.url: {e}")))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::Message(format!(
                "endpoint.url must use ws or wss, got `{other}`"
            ))),
        }
    }

    /// Identity provider chain for the configured credential source.
    ///
    /// With no source configured the provider reports no credential, so the
    /// session fails to connect with `AuthUnavailable`.
    pub fn identity_provider(&self) -> Arc<dyn IdentityProvider> {
        let skew = Duration::from_secs(self.identity.refresh_skew_secs);
        match (&self.identity.token_file, &self.identity.token) {
            (Some(path), _) => Arc::new(CachedProvider::with_skew(TokenFile::new(path), skew)),
            (None, Some(token)) => Arc::new(CachedProvider::with_skew(StaticToken::new(token.as_str()), skew)),
            (None, None) => Arc::new(StaticToken::new("")),
        }
    }

    /// WebSocket transport using the configured token parameter.
    pub fn transport(&self) -> WebSocketTransport {
        WebSocketTransport::new(self.endpoint.token_param.clone())
    }

    /// Session tunables.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            terminators: Terminators::with_extra(self.session.terminators.iter().cloned()),
        }
    }
}
