// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use pgw_server_rs::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    client::udp::UdpImsiClient,
    models::bcd::is_valid_imsi,
};
use tracing::{error, info, warn};

fn print_usage(program: &str) {
    println!("Usage: {program} <IMSI> [config_file]");
    println!("  IMSI: International Mobile Subscriber Identity (6-15 digits)");
    println!(
        "  config_file: Path to JSON configuration file (default: \
         client_config.json)"
    );
    println!("\nExample: {program} 001010123456789 client_config.json");
}

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

/// Exit codes: 0 created, 1 usage, 2 invalid IMSI format, 3 rejected,
/// 4 unexpected reply, 5 transport error, 6 config error, 7 logger error,
/// 8 client setup error.
async fn run() -> i32 {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        print_usage(args.first().map_or("client", String::as_str));
        return 1;
    }

    let imsi = &args[1];
    let config_file = args.get(2).map_or("client_config.json", String::as_str);

    if !is_valid_imsi(imsi) {
        eprintln!("Error: Invalid IMSI format. IMSI must be 6-15 digits.");
        eprintln!("Provided IMSI: {imsi}");
        return 2;
    }

    let cfg = match resolve_config_path(config_file).and_then(Config::load_from_file)
    {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            return 6;
        },
    };

    let _guard = match init_logger(&cfg) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logger error: {e:#}");
            return 7;
        },
    };

    let client = match UdpImsiClient::connect(&cfg).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("UDP client error: {e:#}");
            return 8;
        },
    };

    match client.send_imsi(imsi).await {
        Ok(response) => {
            println!("Server response: {response}");
            info!(%response, "request completed");

            match response.as_str() {
                "created" => 0,
                "rejected" => {
                    info!("session was rejected");
                    3
                },
                other => {
                    warn!("unexpected server response: {other}");
                    4
                },
            }
        },
        Err(e) => {
            eprintln!("Error: {e}");
            error!("request failed: {e}");
            5
        },
    }
}
