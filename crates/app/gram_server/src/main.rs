//! Gram API server binary.
//!
//! Outside local development the server needs PostgreSQL, Redis and a token
//! signing secret. Locally each of them falls back to an in-process
//! replacement and a development session is seeded at startup.

pub use self::error::{Error, Result};
mod error;

mod logging;
mod server;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gram_api::AppState;
use gram_api::config::{ApiConfig, Environment};
use gram_core::auth::jwt::{TokenCodec, generate_secret};
use gram_core::auth::local::{load_local_env, seed_local_env};
use gram_core::cache::{CacheBackend, MemoryCache, RedisCache};
use gram_core::store::{PgStore, Stores};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

/// How often expired entries are swept from the in-memory cache.
const MEMORY_CACHE_SWEEP: Duration = Duration::from_secs(60);

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "gram_server", version, about = "Gram API server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "GRAM_ADDRESS", default_value = "0.0.0.0:8080")]
    address: String,

    /// Deployment environment: local, dev or prod.
    #[arg(long, env = "GRAM_ENVIRONMENT", default_value = "local")]
    environment: String,

    /// Public URL of the platform. Derived from the environment when unset.
    #[arg(long, env = "GRAM_SERVER_URL")]
    server_url: Option<String>,

    /// Host names that bypass custom-domain admission.
    #[arg(long, env = "GRAM_PLATFORM_HOSTS", value_delimiter = ',')]
    platform_hosts: Vec<String>,

    /// Origins allowed by the default CORS policy.
    #[arg(long, env = "GRAM_CORS_ALLOWED_ORIGINS", value_delimiter = ',')]
    cors_allowed_origins: Vec<String>,

    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Redis connection URL.
    #[arg(long, env = "GRAM_REDIS_URL")]
    redis_url: Option<String>,

    /// Secret chat-session tokens are signed with.
    #[arg(long, env = "GRAM_JWT_SIGNING_SECRET", hide_env_values = true)]
    jwt_signing_secret: Option<String>,

    /// Previous signing secrets still accepted when verifying.
    #[arg(
        long,
        env = "GRAM_JWT_VERIFICATION_SECRETS",
        value_delimiter = ',',
        hide_env_values = true
    )]
    jwt_verification_secrets: Vec<String>,

    /// Local development identities (JSON). Only read in the local environment.
    #[arg(long, env = "GRAM_UNSAFE_LOCAL_ENV_PATH")]
    unsafe_local_env_path: Option<PathBuf>,

    #[command(flatten)]
    log: logging::LogArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if let Err(e) = logging::init(&args.log) {
        eprintln!("gram_server: {e}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => {
            info!("server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let environment: Environment = args.environment.parse().map_err(Error::Config)?;
    require_backends(environment, &args)?;

    let listener = TcpListener::bind(&args.address).await?;
    let local_addr = listener.local_addr()?;

    let config = api_config(environment, &args, local_addr.port())?;
    let shutdown = CancellationToken::new();

    let stores = match &args.database_url {
        Some(url) => {
            let pool = PgStore::connect(url).await?;
            PgStore::migrate(&pool).await?;
            Stores::postgres(pool)
        }
        None => {
            warn!("no database configured, using in-memory stores");
            Stores::memory().0
        }
    };

    let cache: Arc<dyn CacheBackend> = match &args.redis_url {
        Some(url) => Arc::new(RedisCache::connect(url).await?),
        None => {
            warn!("no redis configured, using in-memory cache");
            let cache = Arc::new(MemoryCache::new());
            tokio::spawn(sweep_memory_cache(Arc::clone(&cache), shutdown.clone()));
            cache
        }
    };

    let signing_secret = match args.jwt_signing_secret {
        Some(secret) => secret,
        None => {
            warn!("no signing secret configured, chat-session tokens will not survive a restart");
            generate_secret()
        }
    };
    let codec = TokenCodec::new(&signing_secret, &args.jwt_verification_secrets)?;

    let state = AppState::new(config, stores.clone(), cache, codec);

    if environment.is_local() {
        let local_env = load_local_env(args.unsafe_local_env_path.as_deref())?;
        seed_local_env(
            &local_env,
            &stores.identities,
            &stores.projects,
            state.auth.sessions(),
        )
        .await?;
    }

    info!(
        addr = %local_addr,
        environment = %environment,
        server_url = %state.config.server_url,
        "gram server listening"
    );

    tokio::spawn(server::shutdown_signal(shutdown.clone()));
    server::serve(listener, gram_api::router(state), shutdown).await;
    Ok(())
}

/// Outside local development every backend must be configured.
fn require_backends(environment: Environment, args: &Args) -> Result<()> {
    if environment.is_local() {
        return Ok(());
    }

    let missing: Vec<&str> = [
        ("DATABASE_URL", args.database_url.is_none()),
        ("GRAM_REDIS_URL", args.redis_url.is_none()),
        ("GRAM_JWT_SIGNING_SECRET", args.jwt_signing_secret.is_none()),
    ]
    .into_iter()
    .filter_map(|(name, missing)| missing.then_some(name))
    .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{environment} requires {}",
            missing.join(", ")
        )))
    }
}

fn api_config(environment: Environment, args: &Args, port: u16) -> Result<ApiConfig> {
    let server_url = match &args.server_url {
        Some(url) => Url::parse(url)?,
        None => environment.default_server_url(port)?,
    };

    let mut config = ApiConfig::new(environment, server_url);
    if !args.platform_hosts.is_empty() {
        config.platform_hosts = args
            .platform_hosts
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
    }
    if !args.cors_allowed_origins.is_empty() {
        config.cors_allowed_origins = args
            .cors_allowed_origins
            .iter()
            .map(|o| o.trim().trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .collect();
    }
    config.datadog_log_fields = args.log.datadog;
    Ok(config)
}

async fn sweep_memory_cache(cache: Arc<MemoryCache>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(MEMORY_CACHE_SWEEP);
    loop {
        tokio::select! {
            _ = interval.tick() => cache.purge_expired(),
            () = shutdown.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["gram_server"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn local_needs_no_backends() {
        assert!(require_backends(Environment::Local, &args(&[])).is_ok());
    }

    #[test]
    fn prod_lists_every_missing_backend() {
        let err = require_backends(
            Environment::Prod,
            &args(&["--database-url", "postgres://db/gram"]),
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("GRAM_REDIS_URL"));
        assert!(message.contains("GRAM_JWT_SIGNING_SECRET"));
        assert!(!message.contains("DATABASE_URL"));
    }

    #[test]
    fn config_normalizes_host_and_origin_lists() {
        let args = args(&[
            "--platform-hosts",
            "App.Example.com, ,api.example.com",
            "--cors-allowed-origins",
            "https://app.example.com/",
            "--log-datadog",
        ]);
        let config = api_config(Environment::Dev, &args, 8080).unwrap();
        assert_eq!(config.platform_hosts, ["app.example.com", "api.example.com"]);
        assert_eq!(config.cors_allowed_origins, ["https://app.example.com"]);
        assert!(config.datadog_log_fields);
    }
}
