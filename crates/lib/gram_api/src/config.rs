//! API configuration.

use std::fmt;
use std::str::FromStr;

use gram_core::auth::keys::KeyEnvironment;
use url::Url;

/// Hosts operated by the platform itself. Requests to them skip custom
/// domain admission.
pub const DEFAULT_PLATFORM_HOSTS: [&str; 3] = ["app.getgram.ai", "getgram.ai", "dev.getgram.ai"];

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Dev,
    Prod,
}

impl Environment {
    pub fn is_local(&self) -> bool {
        matches!(self, Environment::Local)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }

    /// Marker embedded in API keys minted in this environment.
    pub fn key_environment(&self) -> KeyEnvironment {
        match self {
            Environment::Local => KeyEnvironment::Local,
            Environment::Dev => KeyEnvironment::Test,
            Environment::Prod => KeyEnvironment::Live,
        }
    }

    /// Public URL of the platform when none is configured.
    pub fn default_server_url(&self, port: u16) -> Result<Url, url::ParseError> {
        let raw = match self {
            Environment::Local => format!("http://localhost:{port}"),
            Environment::Dev => "https://dev.getgram.ai".to_string(),
            Environment::Prod => "https://app.getgram.ai".to_string(),
        };
        Url::parse(&raw)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Configuration for the request pipeline.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub environment: Environment,
    /// Public URL of the platform. Its host bypasses domain admission.
    pub server_url: Url,
    /// Lower-cased host names that bypass domain admission.
    pub platform_hosts: Vec<String>,
    /// Origins the default CORS policy allows outside local development.
    pub cors_allowed_origins: Vec<String>,
    /// Add `dd.trace_id` / `dd.span_id` to request spans.
    pub datadog_log_fields: bool,
}

impl ApiConfig {
    /// Configuration with the default platform hosts and the server URL's own
    /// origin as the only allowed CORS origin.
    pub fn new(environment: Environment, server_url: Url) -> Self {
        let origin = server_url.origin().ascii_serialization();
        Self {
            environment,
            server_url,
            platform_hosts: DEFAULT_PLATFORM_HOSTS.iter().map(|h| h.to_string()).collect(),
            cors_allowed_origins: vec![origin],
            datadog_log_fields: false,
        }
    }

    /// Host name of the server URL, lower-cased, without port.
    pub fn server_host(&self) -> Option<String> {
        self.server_url.host_str().map(|h| h.to_ascii_lowercase())
    }

    /// Whether `host` (already normalized) belongs to the platform itself.
    pub fn is_platform_host(&self, host: &str) -> bool {
        self.platform_hosts.iter().any(|h| h == host)
            || self.server_host().is_some_and(|h| h == host)
    }
}
