// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use pgw_server_rs::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    server,
};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

/// Exit codes: 0 normal, 2 config error, 3 UDP engine error, 4 HTTP engine
/// error, 1 anything else.
async fn run() -> i32 {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());

    let cfg = match resolve_config_path(&config_path).and_then(Config::load_from_file)
    {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            return 2;
        },
    };

    // Keep the guard alive for the lifetime of the server; dropping it
    // flushes buffered log lines.
    let _guard = match init_logger(&cfg) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            return 2;
        },
    };

    info!(config = %config_path, "starting pgw-server");

    match server::run(cfg).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{e:#}");
            error!("server failed: {e:#}");
            e.exit_code()
        },
    }
}
