use anyhow::Result;
use scriptbox_config::{LogFormat, LoggingConfig};
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Which kind of process is being initialised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The pool owner; logs to stdout
    Coordinator,
    /// A worker process; logs to stderr without colours
    Worker,
}

/// Build the filter: CLI override, then `RUST_LOG` when set, then the
/// configured level and directives
///
/// A directive string that does not parse is an error, whichever source it
/// came from.
pub fn build_filter(config: &LoggingConfig, level_override: Option<&str>) -> Result<EnvFilter> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty());
    filter_from(config, level_override, rust_log.as_deref())
}

fn filter_from(
    config: &LoggingConfig,
    level_override: Option<&str>,
    rust_log: Option<&str>,
) -> Result<EnvFilter> {
    if let Some(level) = level_override {
        return EnvFilter::try_new(level)
            .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", level, e));
    }

    if let Some(directives) = rust_log {
        return EnvFilter::try_new(directives).map_err(|e| {
            anyhow::anyhow!("Invalid {} '{}': {}", EnvFilter::DEFAULT_ENV, directives, e)
        });
    }

    let mut directives = config.level.to_string();
    if let Some(extra) = &config.directives {
        directives.push(',');
        directives.push_str(extra);
    }

    EnvFilter::try_new(&directives)
        .map_err(|e| anyhow::anyhow!("Invalid logging directives '{}': {}", directives, e))
}

/// Initialize the global subscriber
///
/// Safe to call more than once; later calls leave the first subscriber in
/// place.
pub fn init_logging(
    config: &LoggingConfig,
    target: Target,
    level_override: Option<&str>,
) -> Result<()> {
    let env_filter = build_filter(config, level_override)?;

    let writer = match target {
        Target::Coordinator => BoxMakeWriter::new(std::io::stdout),
        Target::Worker => BoxMakeWriter::new(std::io::stderr),
    };

    // Use try_init to avoid panic if global subscriber already set
    if tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer(config, target, writer))
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

fn fmt_layer<S>(
    config: &LoggingConfig,
    target: Target,
    writer: BoxMakeWriter,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(target == Target::Coordinator)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread_ids);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Text => layer.boxed(),
    }
}
