// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use pgw_server_rs::{
    cfg::config::Config,
    models::bcd::encode_imsi,
    server::{
        bus::EventBus,
        handler::{PacketHandler, PacketManagerError},
        pool::WorkerPool,
        registry::SessionRegistry,
    },
};

use super::wait_until;

struct Harness {
    pool: Arc<WorkerPool>,
    _bus: Arc<EventBus>,
    registry: Arc<SessionRegistry>,
    handler: PacketHandler,
    created: Arc<Mutex<Vec<String>>>,
    rejected: Arc<Mutex<Vec<String>>>,
}

fn build(blacklist: &[&str]) -> Result<Harness> {
    let cfg = Config {
        session_timeout_sec: Some(60),
        graceful_shutdown_rate: Some(100),
        blacklist: Some(blacklist.iter().map(|s| s.to_string()).collect()),
        ..Config::default()
    };

    let pool = WorkerPool::start(2);
    let bus = EventBus::new(pool.clone());
    let registry = SessionRegistry::new(&cfg, pool.clone())?;
    registry.attach_bus(&bus);

    let created = Arc::new(Mutex::new(Vec::new()));
    let rejected = Arc::new(Mutex::new(Vec::new()));
    {
        let c = created.clone();
        bus.subscribe_created(move |imsi| {
            c.lock().expect("created list poisoned").push(imsi);
        });
        let r = rejected.clone();
        bus.subscribe_rejected(move |imsi| {
            r.lock().expect("rejected list poisoned").push(imsi);
        });
    }

    let handler = PacketHandler::new(registry.clone(), bus.clone());

    Ok(Harness {
        pool,
        _bus: bus,
        registry,
        handler,
        created,
        rejected,
    })
}

#[tokio::test]
async fn test_admission_then_duplicate_rejection() -> Result<()> {
    let h = build(&[])?;
    let datagram = encode_imsi("12345678")?;

    assert_eq!(h.handler.handle(&datagram), Ok("created"));
    assert!(h.registry.has_active("12345678"));

    assert_eq!(h.handler.handle(&datagram), Ok("rejected"));
    assert_eq!(h.registry.active_count(), 1);

    assert!(
        wait_until(
            || {
                h.created.lock().expect("lock").as_slice() == ["12345678"]
                    && h.rejected.lock().expect("lock").as_slice() == ["12345678"]
            },
            Duration::from_secs(5),
        )
        .await
    );

    h.pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_blacklisted_imsi_never_creates_a_session() -> Result<()> {
    let h = build(&["001010000000001"])?;
    let datagram = encode_imsi("001010000000001")?;

    assert_eq!(h.handler.handle(&datagram), Ok("rejected"));
    assert!(!h.registry.has_active("001010000000001"));
    assert_eq!(h.registry.active_count(), 0);

    assert!(
        wait_until(
            || h.rejected.lock().expect("lock").as_slice() == ["001010000000001"],
            Duration::from_secs(5),
        )
        .await
    );
    assert!(h.created.lock().expect("lock").is_empty());

    h.pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_undecodable_datagram_is_an_error() -> Result<()> {
    let h = build(&[])?;

    let res = h.handler.handle(&[0xde, 0xad]);
    assert_eq!(res, Err(PacketManagerError::PacketParsingFailed));
    assert_eq!(
        res.expect_err("parse must fail").to_string(),
        "packet_parsing_failed"
    );

    // No event, no session.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.created.lock().expect("lock").is_empty());
    assert!(h.rejected.lock().expect("lock").is_empty());
    assert_eq!(h.registry.active_count(), 0);

    h.pool.shutdown().await;
    Ok(())
}
