// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::Path;

use anyhow::{Context, Result};
use fastrace::collector::{Config as FastraceConfig, ConsoleReporter};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
};

use crate::cfg::config::Config;

/// Installs the global tracing subscriber from the configuration.
///
/// `log_file` and `log_level` are required keys. Output goes to the file in
/// append mode through a non-blocking writer; the returned guard must be
/// kept alive for the lifetime of the process or buffered lines are lost.
pub fn init_logger(cfg: &Config) -> Result<WorkerGuard> {
    let log_file = cfg.log_file()?;
    let level = cfg.log_level()?;

    let dir = log_file.parent().unwrap_or_else(|| Path::new(""));
    let file_name = log_file.file_name().unwrap_or_default();

    let appender = RollingFileAppender::new(Rotation::NEVER, dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    fastrace::set_reporter(ConsoleReporter, FastraceConfig::default());
    let compat_layer = fastrace_tracing::FastraceCompatLayer::new();

    let env_filter = EnvFilter::try_new(level.as_filter_str())
        .or_else(|_| EnvFilter::try_from_default_env())
        .context("failed to parse log level from config or env")?;

    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()));

    let subscriber = Registry::default()
        .with(env_filter)
        .with(compat_layer)
        .with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global default subscriber")?;

    Ok(guard)
}
