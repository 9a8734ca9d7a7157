// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Assembles a full server stack on loopback ephemeral ports, mirroring the
//! orchestrator's wiring but keeping handles so tests can poke at every
//! layer and tear the stack down deterministically.

use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use pgw_server_rs::{
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
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
    task::JoinHandle,
    time::timeout,
};

pub fn temp_path(tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "pgw-server-it-{}-{tag}-{n}",
        std::process::id()
    ))
}

pub struct TestServer {
    pub pool: Arc<WorkerPool>,
    pub bus: Arc<EventBus>,
    pub registry: Arc<SessionRegistry>,
    pub cdr_path: PathBuf,
    pub udp_addr: SocketAddr,
    pub http_addr: SocketAddr,
    udp_task: JoinHandle<Result<(), UdpEngineError>>,
    http_task: JoinHandle<Result<(), HttpEngineError>>,
}

pub async fn start_server(
    session_timeout_sec: u32,
    shutdown_rate: u32,
    blacklist: &[&str],
) -> Result<TestServer> {
    let cdr_path = temp_path("cdr");
    let cfg = Config {
        server_ip: Some("127.0.0.1".to_string()),
        server_port: Some(0),
        http_port: Some(0),
        session_timeout_sec: Some(session_timeout_sec),
        cdr_file: Some(cdr_path.clone()),
        graceful_shutdown_rate: Some(shutdown_rate),
        blacklist: Some(blacklist.iter().map(|s| s.to_string()).collect()),
        ..Config::default()
    };

    let pool = WorkerPool::start(4);
    let bus = EventBus::new(pool.clone());

    let registry = SessionRegistry::new(&cfg, pool.clone())?;
    registry.attach_bus(&bus);
    {
        let r = registry.clone();
        bus.subscribe_created(move |imsi| r.schedule_expiry(imsi));
        let r = registry.clone();
        bus.subscribe_shutdown(move || r.start_graceful_drain());
    }

    let cdr = CdrWriter::open(&cdr_path)?;
    cdr.subscribe(&bus);

    let http =
        Arc::new(HttpEngine::bind(cfg.http_addr()?, registry.clone(), bus.clone()).await?);
    let udp = Arc::new(
        UdpEngine::bind(
            cfg.udp_addr()?,
            PacketHandler::new(registry.clone(), bus.clone()),
        )
        .await?,
    );

    {
        let h = http.clone();
        bus.subscribe_shutdown(move || h.stop());
        let u = udp.clone();
        bus.subscribe_shutdown(move || u.stop());
    }

    let udp_addr = udp.local_addr()?;
    let http_addr = http.local_addr()?;

    let udp_task = tokio::spawn({
        let udp = udp.clone();
        async move { udp.run().await }
    });
    let http_task = tokio::spawn({
        let http = http.clone();
        async move { http.run().await }
    });

    Ok(TestServer {
        pool,
        bus,
        registry,
        cdr_path,
        udp_addr,
        http_addr,
        udp_task,
        http_task,
    })
}

impl TestServer {
    /// Waits for both engine loops to exit, then runs the orchestrator's
    /// tail: drain to empty and stop the pool.
    pub async fn finish(self) -> Result<Vec<(String, String)>> {
        timeout(Duration::from_secs(10), self.udp_task)
            .await
            .context("UDP engine did not stop in time")???;
        timeout(Duration::from_secs(10), self.http_task)
            .await
            .context("HTTP engine did not stop in time")???;

        if !self.registry.is_draining() {
            self.registry.start_graceful_drain();
        }
        timeout(Duration::from_secs(30), self.registry.drain_finished())
            .await
            .context("drain did not finish in time")?;
        self.registry.purge_remaining();
        self.pool.shutdown().await;

        let records = read_cdr(&self.cdr_path);
        let _ = std::fs::remove_file(&self.cdr_path);
        Ok(records)
    }

    /// Stops the engines directly, bypassing the HTTP route.
    pub fn stop_engines(&self) {
        self.bus.publish_shutdown();
    }
}

/// Polls `cond` until it holds or `max` elapses.
pub async fn wait_until<F: Fn() -> bool>(cond: F, max: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + max;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

/// Parses the CDR file into `(imsi, action)` pairs.
pub fn read_cdr(path: &std::path::Path) -> Vec<(String, String)> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(", ");
            let _timestamp = fields.next()?;
            Some((fields.next()?.to_string(), fields.next()?.to_string()))
        })
        .collect()
}

/// One datagram out, one reply back, from a fresh ephemeral socket.
pub async fn udp_exchange(server: SocketAddr, payload: &[u8]) -> Result<String> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket.send_to(payload, server).await?;

    let mut buf = [0u8; 1024];
    let (n, _) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .context("no UDP reply")??;
    Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
}

/// Minimal HTTP/1.1 request; returns (status, body).
pub async fn http_request(
    addr: SocketAddr,
    method: &str,
    target: &str,
) -> Result<(u16, String)> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!(
        "{method} {target} HTTP/1.1\r\nHost: {addr}\r\nContent-Length: 0\r\n\
         Connection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    let mut raw = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .context("no HTTP response")??;

    let text = String::from_utf8_lossy(&raw);
    let status: u16 = text
        .split_whitespace()
        .nth(1)
        .context("malformed status line")?
        .parse()?;
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    Ok((status, body))
}
