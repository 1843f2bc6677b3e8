use std::io::LineWriter;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

pub struct InitLoggingOptions<'a> {
    /// The default log threshold, overridable via RUST_LOG.
    pub default_rust_log_value: Option<&'a str>,
    /// A log file to also write to in addition to the console.
    pub log_file: Option<&'a str>,
    pub log_json: bool,
}

#[inline(never)]
pub fn init_logging(opts: InitLoggingOptions) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            opts.default_rust_log_value
                .unwrap_or("info")
                .parse()
                .context("can't parse provided log level")?,
        )
        .from_env()
        .context("invalid RUST_LOG value")?;

    let stdout_layer: Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync> = if opts.log_json
    {
        Box::new(fmt::layer().json())
    } else {
        Box::new(fmt::layer())
    };

    let layered = tracing_subscriber::registry().with(stdout_layer.with_filter(filter));

    if let Some(log_file) = opts.log_file {
        let file_filter = EnvFilter::builder()
            .parse(opts.default_rust_log_value.unwrap_or("info"))
            .context("can't parse provided log level")?;
        let log_file = std::sync::Mutex::new(LineWriter::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)
                .with_context(|| format!("error opening log file {log_file:?}"))?,
        ));
        layered
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(log_file)
                    .with_filter(file_filter),
            )
            .try_init()
            .context("can't init logging to file")?;
    } else {
        layered.try_init().context("can't init logging")?;
    }

    Ok(())
}
