use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{QuizError, QuizResult};

/// Build the filter: RUST_LOG wins, otherwise the configured level
pub fn env_filter(config: &LoggingConfig) -> QuizResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            QuizError::config(format!("invalid log filter '{}': {}", config.level, e))
        }),
    }
}

/// Initialize the global tracing subscriber
///
/// Logs go to stderr so command output on stdout stays machine-readable.
/// Calling this twice is harmless; the second call only logs at debug level.
pub fn init_logging(config: &LoggingConfig) -> QuizResult<()> {
    let filter = env_filter(config)?;

    let result = fmt::Subscriber::builder()
        .with_ansi(config.ansi)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(config.with_target)
        .try_init();

    match result {
        Ok(()) => {
            info!("Initializing quizpilot v{}", crate::version());
        }
        Err(e) => {
            debug!("Logger already initialized: {}", e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_config_error() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "quizpilot=notalevel".to_string(),
            ..LoggingConfig::default()
        };
        assert!(matches!(env_filter(&config), Err(QuizError::Config { .. })));
    }

    #[test]
    fn test_init_twice_is_ok() {
        let config = LoggingConfig {
            ansi: false,
            ..LoggingConfig::default()
        };
        init_logging(&config).unwrap();
        init_logging(&config).unwrap();
    }
}
