// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Fixed-size worker pool behind a single FIFO task queue.
//!
//! Every event-bus handler invocation and every scheduled session expiry
//! runs here. Stop is cooperative: workers finish the task they are running,
//! drain whatever is still queued, and only then exit.

use std::{future::Future, pin::Pin, sync::Arc};

use anyhow::{Result, anyhow, bail};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct WorkerPool {
    tx: mpsc::UnboundedSender<Task>,
    stop: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `workers` worker tasks sharing one FIFO queue.
    pub fn start(workers: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        let stop = CancellationToken::new();

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            handles.push(tokio::spawn(worker_loop(id, rx.clone(), stop.clone())));
        }

        Arc::new(Self {
            tx,
            stop,
            workers: Mutex::new(handles),
        })
    }

    /// Submits a task to the queue. Fails once stop has begun.
    pub fn enqueue<F>(&self, task: F) -> Result<()>
    where F: Future<Output = ()> + Send + 'static {
        if self.stop.is_cancelled() {
            bail!("worker pool is stopping, task rejected");
        }
        self.tx
            .send(Box::pin(task))
            .map_err(|_| anyhow!("worker pool queue is closed"))
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Cooperative stop: rejects further enqueues, lets workers drain the
    /// queue, then joins them.
    pub async fn shutdown(&self) {
        self.stop.cancel();
        let handles = {
            let mut workers = self.workers.lock().await;
            std::mem::take(&mut *workers)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("worker task failed to join: {e}");
            }
        }
        debug!("worker pool stopped");
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>,
    stop: CancellationToken,
) {
    loop {
        // The queue lock is only held while dequeuing, never while a task
        // runs, so workers execute concurrently.
        let task = {
            let mut rx = rx.lock().await;
            tokio::select! {
                t = rx.recv() => t,
                _ = stop.cancelled() => None,
            }
        };

        match task {
            Some(task) => task.await,
            None => break,
        }
    }

    // Drain what was queued before the stop request.
    loop {
        let task = { rx.lock().await.try_recv() };
        match task {
            Ok(task) => task.await,
            Err(_) => break,
        }
    }

    debug!(worker = id, "worker exited");
}
