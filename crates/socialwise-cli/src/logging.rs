use anyhow::Context;
use socialwise_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `--verbose` forces `debug`, then the
/// configured level, then `info`; per-crate `filters` are layered on top.
pub fn init(config: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level = if verbose {
                "debug"
            } else {
                config.level.as_deref().unwrap_or("info")
            };
            let mut filter = EnvFilter::try_new(level)
                .with_context(|| format!("invalid log level '{level}'"))?;
            for directive in &config.filters {
                filter = filter.add_directive(
                    directive
                        .parse()
                        .with_context(|| format!("invalid log filter '{directive}'"))?,
                );
            }
            filter
        }
    };

    let writer = match config.output.as_str() {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    let installed = match config.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}
