// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Server assembly and lifecycle.
//!
//! Construction order: worker pool, event bus, session registry, CDR
//! writer, HTTP engine, UDP engine. Shutdown flows through the bus: either
//! `/stop` or an interrupt publishes the shutdown event, each long-running
//! loop stops through its own subscription, and once both engines have
//! exited the registry drain is awaited before the worker pool stops.

pub mod bus;
pub mod cdr;
pub mod handler;
pub mod http;
pub mod pool;
pub mod registry;
pub mod udp;

use std::sync::Arc;

use anyhow::anyhow;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::info;

use crate::{
    cfg::config::Config,
    server::{
        bus::EventBus,
        cdr::CdrWriter,
        handler::PacketHandler,
        http::{HttpEngine, HttpEngineError},
        pool::WorkerPool,
        registry::SessionRegistry,
        udp::{UdpEngine, UdpEngineError},
    },
};

/// Top-level failure, carrying the process exit code the original operator
/// tooling expects.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0:#}")]
    Config(anyhow::Error),
    #[error(transparent)]
    Udp(#[from] UdpEngineError),
    #[error(transparent)]
    Http(#[from] HttpEngineError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ServerError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ServerError::Config(_) => 2,
            ServerError::Udp(_) => 3,
            ServerError::Http(_) => 4,
            ServerError::Other(_) => 1,
        }
    }
}

/// Assembles every component from the configuration and runs both engines
/// to completion.
pub async fn run(cfg: Config) -> Result<(), ServerError> {
    let workers = std::thread::available_parallelism().map_or(4, usize::from);
    let pool = WorkerPool::start(workers);
    let bus = EventBus::new(pool.clone());

    let registry =
        SessionRegistry::new(&cfg, pool.clone()).map_err(ServerError::Config)?;
    registry.attach_bus(&bus);
    {
        let r = registry.clone();
        bus.subscribe_created(move |imsi| r.schedule_expiry(imsi));
        let r = registry.clone();
        bus.subscribe_shutdown(move || r.start_graceful_drain());
    }

    let cdr_path = cfg.cdr_file().map_err(ServerError::Config)?;
    let cdr = CdrWriter::open(cdr_path)?;
    cdr.subscribe(&bus);

    let http_addr = cfg.http_addr().map_err(ServerError::Config)?;
    let udp_addr = cfg.udp_addr().map_err(ServerError::Config)?;

    let http =
        Arc::new(HttpEngine::bind(http_addr, registry.clone(), bus.clone()).await?);
    let udp = Arc::new(
        UdpEngine::bind(udp_addr, PacketHandler::new(registry.clone(), bus.clone()))
            .await?,
    );

    {
        let h = http.clone();
        bus.subscribe_shutdown(move || h.stop());
        let u = udp.clone();
        bus.subscribe_shutdown(move || u.stop());
    }

    {
        let bus = bus.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, initiating graceful shutdown");
                bus.publish_shutdown();
            }
        });
    }

    let mut udp_task = tokio::spawn({
        let udp = udp.clone();
        async move { udp.run().await }
    });
    let mut http_task = tokio::spawn({
        let http = http.clone();
        async move { http.run().await }
    });

    // Either loop exiting takes the other one down with it.
    let (udp_res, http_res) = tokio::select! {
        res = &mut udp_task => {
            http.stop();
            (flatten(res), flatten(http_task.await))
        },
        res = &mut http_task => {
            udp.stop();
            (flatten(udp_task.await), flatten(res))
        },
    };

    if !registry.is_draining() {
        registry.start_graceful_drain();
    }
    registry.drain_finished().await;
    registry.purge_remaining();
    pool.shutdown().await;

    udp_res?;
    http_res?;
    info!("server stopped");
    Ok(())
}

fn flatten<E: Into<ServerError>>(
    res: Result<Result<(), E>, JoinError>,
) -> Result<(), ServerError> {
    match res {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(ServerError::Other(anyhow!("engine task panicked: {e}"))),
    }
}
