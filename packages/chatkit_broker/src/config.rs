use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryPolicy;

// =============================================================================
// Unified config (figment-deserialized from defaults / chatkit.toml / env vars)
// =============================================================================
//
// Equivalent ways to configure:
//
//   chatkit.toml:    [upstream]
//                    timeout_secs = 5
//
//   env var:         CHATKIT_UPSTREAM__TIMEOUT_SECS=5   (double underscore = nesting)
//
// The well-known variables below win over everything else:
//
//   OPENAI_API_KEY       → upstream.api_key
//   CHATKIT_API_BASE     → upstream.api_base
//   CHATKIT_WORKFLOW_ID  → upstream.workflow_id

pub const DEFAULT_CONFIG_FILE: &str = "chatkit.toml";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub upstream: UpstreamFileConfig,
}

/// HTTP listener tunables (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Production deployments mark the anonymous session cookie `Secure`.
    #[serde(default)]
    pub production: bool,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            production: false,
        }
    }
}

/// Session-issuing API tunables (lives under `[upstream]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamFileConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Workflow used when the request body names none.
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for UpstreamFileConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            workflow_id: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    2000
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Build a figment that layers: defaults → config file → CHATKIT_* env vars →
/// well-known env vars.
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("CHATKIT_").split("__"))
        .merge(
            Env::raw()
                .only(&["OPENAI_API_KEY"])
                .map(|_| "upstream.api_key".into()),
        )
        .merge(
            Env::raw()
                .only(&["CHATKIT_API_BASE"])
                .map(|_| "upstream.api_base".into()),
        )
        .merge(
            Env::raw()
                .only(&["CHATKIT_WORKFLOW_ID"])
                .map(|_| "upstream.workflow_id".into()),
        )
}

impl FileConfig {
    /// Copy suitable for printing: the API key is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.upstream.api_key.is_some() {
            copy.upstream.api_key = Some("********".to_string());
        }
        copy
    }
}

// =============================================================================
// Runtime config structs (derived from FileConfig, passed to the handlers)
// =============================================================================

/// Everything the broker needs at request time. Built once at startup and
/// shared read-only across requests.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub retry: RetryPolicy,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Set the `Secure` attribute on the anonymous session cookie
    pub secure_cookies: bool,
}

#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    /// Bearer credential; `None` makes every session request fail with 500
    pub api_key: Option<String>,
    /// Base URL without a trailing slash
    pub api_base: String,
    pub default_workflow_id: Option<String>,
    /// Per-attempt deadline
    pub timeout: Duration,
    pub max_body_bytes: usize,
}

impl UpstreamConfig {
    pub fn sessions_url(&self) -> String {
        format!("{}/v1/chatkit/sessions", self.api_base)
    }
}

impl BrokerConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        let api_base = non_blank(Some(&fc.upstream.api_base))
            .unwrap_or_else(default_api_base)
            .trim_end_matches('/')
            .to_string();

        Self {
            server: ServerConfig {
                host: fc.server.host.clone(),
                port: fc.server.port,
                secure_cookies: fc.server.production,
            },
            upstream: UpstreamConfig {
                api_key: non_blank(fc.upstream.api_key.as_ref()),
                api_base,
                default_workflow_id: non_blank(fc.upstream.workflow_id.as_ref()),
                timeout: Duration::from_secs(fc.upstream.timeout_secs),
                max_body_bytes: fc.upstream.max_body_bytes,
            },
            retry: RetryPolicy::new(
                fc.upstream.max_retries,
                Duration::from_millis(fc.upstream.backoff_base_ms),
            ),
        }
    }
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
