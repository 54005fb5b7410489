// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fs;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, time::ChronoLocal, writer::BoxMakeWriter},
};

#[derive(Debug, Deserialize, Clone)]
struct LoggerConfig {
    logger: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
enum Output {
    Stdout,
    Stderr,
    File,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
enum RotationFreq {
    Minutely,
    Hourly,
    Daily,
    Never,
}

#[derive(Debug, Deserialize, Clone)]
struct LogFileConfig {
    path: String,
    #[serde(default)]
    rotation_frequency: Option<RotationFreq>,
}

#[derive(Debug, Deserialize, Clone)]
struct LogConfig {
    level: String,
    output: Output,
    #[serde(default)]
    json: bool,
    is_show_line: bool,
    is_show_target: bool,
    file: Option<LogFileConfig>,
}

/// Initialize the global tracing subscriber from a YAML logger config.
///
/// Returns the appender guard when logging to a file; dropping it flushes
/// and stops the background writer, so keep it alive for the process
/// lifetime.
pub fn init_logger(path: &str) -> Result<Option<WorkerGuard>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read logger config {path}"))?;
    let cfg: LoggerConfig =
        serde_yaml::from_str(&raw).context("failed to parse logger config YAML")?;
    let cfg = cfg.logger;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .context("invalid log level")?;

    let (writer, guard): (BoxMakeWriter, Option<WorkerGuard>) = match cfg.output {
        Output::Stdout => (BoxMakeWriter::new(std::io::stdout), None),
        Output::Stderr => (BoxMakeWriter::new(std::io::stderr), None),
        Output::File => {
            let file_cfg = cfg
                .file
                .clone()
                .context("logger output is 'file' but no file section is present")?;
            let path = std::path::Path::new(&file_cfg.path);
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .context("logger file path has no file name")?;
            let rotation = match file_cfg.rotation_frequency {
                Some(RotationFreq::Minutely) => Rotation::MINUTELY,
                Some(RotationFreq::Hourly) => Rotation::HOURLY,
                Some(RotationFreq::Daily) => Rotation::DAILY,
                Some(RotationFreq::Never) | None => Rotation::NEVER,
            };
            let appender = RollingFileAppender::new(rotation, dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::rfc_3339())
        .with_line_number(cfg.is_show_line)
        .with_file(cfg.is_show_line)
        .with_target(cfg.is_show_target)
        .with_writer(writer);

    let result = if cfg.json {
        builder.json().try_init()
    } else {
        builder
            .with_ansi(!matches!(cfg.output, Output::File))
            .try_init()
    };
    // A second init (tests) keeps the first subscriber; not an error.
    if let Err(e) = result {
        tracing::debug!("logger already initialized: {e}");
    }

    Ok(guard)
}
