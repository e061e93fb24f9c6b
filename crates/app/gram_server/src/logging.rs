//! Log output setup.
//!
//! Records are JSON lines on stderr unless pretty output is requested.
//! `RUST_LOG`, when set, overrides the level.

use tracing_subscriber::EnvFilter;

use crate::Error;

const LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

#[derive(Debug, Clone, clap::Args)]
pub struct LogArgs {
    /// Minimum level: debug, info, warn or error.
    #[arg(long = "log-level", env = "GRAM_LOG_LEVEL", default_value = "info")]
    pub level: String,

    /// Human-readable output instead of JSON lines.
    #[arg(long = "log-pretty", env = "GRAM_LOG_PRETTY", default_value_t = false)]
    pub pretty: bool,

    /// Add Datadog trace correlation fields to request spans.
    #[arg(long = "log-datadog", env = "GRAM_LOG_DATADOG", default_value_t = false)]
    pub datadog: bool,
}

fn filter(level: &str) -> Result<EnvFilter, Error> {
    let level = level.trim().to_ascii_lowercase();
    if !LEVELS.contains(&level.as_str()) {
        return Err(Error::Logging(format!(
            "invalid log level {level:?}, expected one of {}",
            LEVELS.join(", ")
        )));
    }

    Ok(EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},hyper=warn,sqlx=warn"))))
}

pub fn init(args: &LogArgs) -> Result<(), Error> {
    let filter = filter(&args.level)?;

    let installed = if args.pretty {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .try_init()
    };

    installed.map_err(|e| Error::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_levels_are_accepted() {
        for level in ["debug", "INFO", " warn ", "error"] {
            assert!(filter(level).is_ok(), "{level}");
        }
    }

    #[test]
    fn unknown_level_is_rejected() {
        assert!(matches!(filter("trace"), Err(Error::Logging(_))));
        assert!(matches!(filter("verbose"), Err(Error::Logging(_))));
    }
}
