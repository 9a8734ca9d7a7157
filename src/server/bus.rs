// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Typed in-process publish/subscribe.
//!
//! The event set is closed, so instead of a type-erased subscriber table the
//! bus keeps one explicit handler list per event kind. Publishing enqueues
//! one worker-pool task per handler; the publisher never blocks on handler
//! execution. Subscriptions happen during startup only.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use crate::server::pool::WorkerPool;

/// Session lifecycle events carried by the bus. The payload is the IMSI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Created { imsi: String },
    Deleted { imsi: String },
    Rejected { imsi: String },
}

impl SessionEvent {
    pub fn imsi(&self) -> &str {
        match self {
            SessionEvent::Created { imsi }
            | SessionEvent::Deleted { imsi }
            | SessionEvent::Rejected { imsi } => imsi,
        }
    }
}

type SessionHandler = Arc<dyn Fn(String) + Send + Sync>;
type ShutdownHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Handlers {
    created: Vec<SessionHandler>,
    deleted: Vec<SessionHandler>,
    rejected: Vec<SessionHandler>,
    shutdown: Vec<ShutdownHandler>,
}

pub struct EventBus {
    pool: Arc<WorkerPool>,
    handlers: RwLock<Handlers>,
}

impl EventBus {
    pub fn new(pool: Arc<WorkerPool>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            handlers: RwLock::new(Handlers::default()),
        })
    }

    pub fn subscribe_created<F>(&self, handler: F)
    where F: Fn(String) + Send + Sync + 'static {
        self.write().created.push(Arc::new(handler));
    }

    pub fn subscribe_deleted<F>(&self, handler: F)
    where F: Fn(String) + Send + Sync + 'static {
        self.write().deleted.push(Arc::new(handler));
    }

    pub fn subscribe_rejected<F>(&self, handler: F)
    where F: Fn(String) + Send + Sync + 'static {
        self.write().rejected.push(Arc::new(handler));
    }

    pub fn subscribe_shutdown<F>(&self, handler: F)
    where F: Fn() + Send + Sync + 'static {
        self.write().shutdown.push(Arc::new(handler));
    }

    /// Fans a session event out to its subscribers via the worker pool.
    /// Never fails; when the pool is stopping the event is dropped.
    pub fn publish(&self, event: SessionEvent) {
        let handlers = self.read();
        let (list, imsi) = match &event {
            SessionEvent::Created { imsi } => (&handlers.created, imsi),
            SessionEvent::Deleted { imsi } => (&handlers.deleted, imsi),
            SessionEvent::Rejected { imsi } => (&handlers.rejected, imsi),
        };

        for handler in list {
            let handler = handler.clone();
            let imsi = imsi.clone();
            if let Err(e) = self.pool.enqueue(async move { handler(imsi) }) {
                warn!(event = ?event, "dropping event: {e}");
            }
        }
    }

    /// Fans the shutdown signal out to its subscribers.
    pub fn publish_shutdown(&self) {
        for handler in &self.read().shutdown {
            let handler = handler.clone();
            if let Err(e) = self.pool.enqueue(async move { handler() }) {
                warn!("dropping shutdown event: {e}");
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Handlers> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Handlers> {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
