// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! In-memory session registry.
//!
//! One session per IMSI, guarded by a single mutex that is never held
//! across an await point. Expiry is a per-session sleep task on the worker
//! pool; graceful drain is a single-entry background task deleting one
//! session per `1/graceful_shutdown_rate` seconds. When the drain starts it
//! cancels outstanding expiry timers and becomes the sole deleter, so a
//! session can never emit `SessionDeleted` twice.

use std::{
    collections::{HashMap, HashSet, hash_map::Entry},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cfg::config::Config,
    server::{
        bus::{EventBus, SessionEvent},
        pool::WorkerPool,
    },
};

/// An admitted subscriber. Presence in the registry map is what makes a
/// session "active"; the record itself only carries its key.
#[derive(Debug)]
pub struct Session {
    imsi: String,
}

impl Session {
    pub fn imsi(&self) -> &str {
        &self.imsi
    }
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    blacklist: HashSet<String>,
    session_timeout: Duration,
    shutdown_rate: u32,

    pool: Arc<WorkerPool>,
    /// Non-owning back-reference; the orchestrator owns both the bus and the
    /// registry, and the bus holds handlers that capture this registry.
    bus: OnceCell<Weak<EventBus>>,

    drain_started: AtomicBool,
    /// Cancels pending expiry timers once the drain takes over.
    expiry_cancel: CancellationToken,
    /// Cancelled when the drain has emptied the map.
    drain_done: CancellationToken,
}

impl SessionRegistry {
    pub fn new(cfg: &Config, pool: Arc<WorkerPool>) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            blacklist: cfg.blacklist(),
            session_timeout: cfg.session_timeout()?,
            shutdown_rate: cfg.shutdown_rate()?,
            pool,
            bus: OnceCell::new(),
            drain_started: AtomicBool::new(false),
            expiry_cancel: CancellationToken::new(),
            drain_done: CancellationToken::new(),
        }))
    }

    /// Must be called once after the bus exists.
    pub fn attach_bus(&self, bus: &Arc<EventBus>) {
        let _ = self.bus.set(Arc::downgrade(bus));
    }

    /// Atomic check-and-insert. `None` is the "already exists" sentinel.
    pub fn create_session(&self, imsi: &str) -> Option<Arc<Session>> {
        let mut sessions = self.lock_sessions();
        match sessions.entry(imsi.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let session = Arc::new(Session {
                    imsi: imsi.to_string(),
                });
                slot.insert(session.clone());
                Some(session)
            },
        }
    }

    /// Removes a session; returns whether an entry was actually removed.
    pub fn delete_session(&self, imsi: &str) -> bool {
        let removed = self.lock_sessions().remove(imsi).is_some();
        if !removed {
            warn!(imsi, "delete_session: no active session");
        }
        removed
    }

    pub fn has_active(&self, imsi: &str) -> bool {
        self.lock_sessions().contains_key(imsi)
    }

    pub fn is_blacklisted(&self, imsi: &str) -> bool {
        self.blacklist.contains(imsi)
    }

    pub fn active_count(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Schedules the timeout deletion for a freshly created session.
    ///
    /// The sleep races the drain's cancel token: once a graceful drain has
    /// begun, timers stand down and the drain owns every remaining deletion.
    pub fn schedule_expiry(self: &Arc<Self>, imsi: String) {
        let registry = self.clone();
        let timeout = self.session_timeout;
        let cancel = self.expiry_cancel.clone();

        let res = self.pool.enqueue(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if registry.delete_session(&imsi) {
                        debug!(%imsi, "session expired");
                        registry.publish(SessionEvent::Deleted { imsi });
                    }
                },
                _ = cancel.cancelled() => {
                    debug!(%imsi, "expiry timer cancelled, drain takes over");
                },
            }
        });
        if let Err(e) = res {
            warn!("failed to schedule session expiry: {e}");
        }
    }

    /// Kicks off the rate-limited drain. Single-entry; a second call is
    /// ignored with a warning. Returns immediately.
    pub fn start_graceful_drain(self: &Arc<Self>) {
        if self.drain_started.swap(true, Ordering::SeqCst) {
            warn!("graceful drain already running, ignoring");
            return;
        }

        info!(
            rate = self.shutdown_rate,
            active = self.active_count(),
            "starting graceful session drain"
        );
        self.expiry_cancel.cancel();

        let registry = self.clone();
        tokio::spawn(async move {
            registry.drain_loop().await;
        });
    }

    pub fn is_draining(&self) -> bool {
        self.drain_started.load(Ordering::SeqCst)
    }

    /// Resolves once a started drain has emptied the registry.
    pub async fn drain_finished(&self) {
        self.drain_done.cancelled().await;
    }

    async fn drain_loop(&self) {
        let period = Duration::from_secs(1) / self.shutdown_rate;

        loop {
            let next = {
                let sessions = self.lock_sessions();
                sessions.keys().next().cloned()
            };
            let Some(imsi) = next else { break };

            tokio::time::sleep(period).await;
            if self.delete_session(&imsi) {
                self.publish(SessionEvent::Deleted { imsi });
            }
        }

        info!("graceful drain complete");
        self.drain_done.cancel();
    }

    /// Deletes everything still in the map, publishing one deletion per
    /// entry. The orchestrator calls this after both engines have stopped
    /// and the drain has finished, so a session admitted in the shutdown
    /// window still gets its deletion record.
    pub fn purge_remaining(&self) {
        let remaining: Vec<String> =
            self.lock_sessions().keys().cloned().collect();
        for imsi in remaining {
            if self.delete_session(&imsi) {
                self.publish(SessionEvent::Deleted { imsi });
            }
        }
    }

    fn publish(&self, event: SessionEvent) {
        match self.bus.get().and_then(Weak::upgrade) {
            Some(bus) => bus.publish(event),
            None => warn!(event = ?event, "event bus is gone, dropping event"),
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
