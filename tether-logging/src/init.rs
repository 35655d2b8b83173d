use anyhow::Result;
use tether_config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Resolve the filter: explicit level, then `RUST_LOG`, then `info`
pub fn build_env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging from configuration
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(config.level.as_str());
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);

    // try_init: a second initialisation keeps the first subscriber
    let result = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
        LogFormat::Compact => builder.compact().with_target(false).try_init(),
        LogFormat::Pretty => builder.pretty().with_line_number(true).try_init(),
    };

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Initialize simple tracing for basic console output
pub fn init_simple_tracing(log_level: &str) -> Result<()> {
    let env_filter = build_env_filter(log_level);

    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}
