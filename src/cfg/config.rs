// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashSet,
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::cfg::enums::LogLevel;

/// Server/client configuration, read once from a JSON file.
///
/// Every key may be absent or `null`; nothing fails at parse time. Consumers
/// call the typed accessors below, which fail explicitly when a key they
/// require is missing.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// IP address the UDP and HTTP engines bind to (client: server address).
    pub server_ip: Option<String>,
    /// UDP port of the admission exchange.
    pub server_port: Option<u16>,
    /// TCP port of the HTTP control plane.
    pub http_port: Option<u16>,
    /// Lifetime of an admitted session, in seconds.
    pub session_timeout_sec: Option<u32>,
    /// Append-only CDR file path.
    pub cdr_file: Option<PathBuf>,
    /// Sessions deleted per second during graceful shutdown.
    pub graceful_shutdown_rate: Option<u32>,
    /// Log destination file path.
    pub log_file: Option<PathBuf>,
    /// Minimum severity written to the log.
    pub log_level: Option<LogLevel>,
    /// IMSIs that are always rejected.
    pub blacklist: Option<HashSet<String>>,
}

impl Config {
    /// Loads the configuration from a JSON file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(&path).with_context(|| {
            format!("cannot open config file: {}", path.as_ref().display())
        })?;
        let cfg: Config =
            serde_json::from_str(&s).context("failed to parse config JSON")?;
        Ok(cfg)
    }

    /// Bind/destination address of the UDP admission socket.
    pub fn udp_addr(&self) -> Result<SocketAddr> {
        let ip = self
            .server_ip
            .as_deref()
            .context("server_ip is missing in config")?;
        let port = self
            .server_port
            .context("server_port is missing in config")?;
        let ip: IpAddr = ip
            .parse()
            .with_context(|| format!("invalid server_ip: {ip}"))?;
        Ok(SocketAddr::new(ip, port))
    }

    /// Bind address of the HTTP control plane.
    pub fn http_addr(&self) -> Result<SocketAddr> {
        let ip = self
            .server_ip
            .as_deref()
            .context("server_ip is missing in config")?;
        let port = self.http_port.context("http_port is missing in config")?;
        let ip: IpAddr = ip
            .parse()
            .with_context(|| format!("invalid server_ip: {ip}"))?;
        Ok(SocketAddr::new(ip, port))
    }

    pub fn session_timeout(&self) -> Result<Duration> {
        let secs = self
            .session_timeout_sec
            .context("session_timeout_sec is missing in config")?;
        Ok(Duration::from_secs(u64::from(secs)))
    }

    pub fn cdr_file(&self) -> Result<&Path> {
        self.cdr_file
            .as_deref()
            .context("cdr_file is missing in config")
    }

    /// Graceful-drain rate, sessions per second. Must be >= 1.
    pub fn shutdown_rate(&self) -> Result<u32> {
        let rate = self
            .graceful_shutdown_rate
            .context("graceful_shutdown_rate is missing in config")?;
        ensure!(rate >= 1, "graceful_shutdown_rate must be >= 1, got {rate}");
        Ok(rate)
    }

    pub fn log_file(&self) -> Result<&Path> {
        self.log_file
            .as_deref()
            .context("log_file is missing in config")
    }

    pub fn log_level(&self) -> Result<LogLevel> {
        self.log_level.context("log_level is missing in config")
    }

    /// The configured blacklist; an absent key means an empty set.
    pub fn blacklist(&self) -> HashSet<String> {
        self.blacklist.clone().unwrap_or_default()
    }
}
