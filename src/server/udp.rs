// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Non-blocking UDP request/response engine.
//!
//! A single task drives the socket through readiness notifications. Reads
//! and writes are decoupled by two FIFOs: datagrams drain into a request
//! queue as long as the socket is readable, verdicts drain out of a
//! response queue as long as the socket is writable. Write interest is only
//! registered while responses are pending, and at most [`MAX_BATCH`]
//! requests are handled per tick so a flood cannot starve response writes.

use std::{collections::VecDeque, io, net::SocketAddr};

use bytes::Bytes;
use thiserror::Error;
use tokio::{io::Interest, net::UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::handler::PacketHandler;

/// Largest datagram the engine accepts.
pub const RECV_BUFFER_SIZE: usize = 1024;

/// Requests handled per readiness tick.
const MAX_BATCH: usize = 10;

/// Send retries during the post-stop flush before giving up on a response.
const MAX_FLUSH_RETRIES: usize = 16;

#[derive(Debug, Error)]
pub enum UdpEngineError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: io::Error,
    },
    #[error("UDP readiness wait failed: {0}")]
    Readiness(#[source] io::Error),
}

pub struct UdpEngine {
    socket: UdpSocket,
    handler: PacketHandler,
    stop: CancellationToken,
}

impl UdpEngine {
    pub async fn bind(
        addr: SocketAddr,
        handler: PacketHandler,
    ) -> Result<Self, UdpEngineError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| UdpEngineError::Bind { addr, source })?;
        info!(%addr, "UDP engine listening");

        Ok(Self {
            socket,
            handler,
            stop: CancellationToken::new(),
        })
    }

    /// Actual bound address (useful when binding port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Thread-safe stop request; wakes the readiness wait.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Runs the readiness loop until stopped. On stop, remaining requests
    /// are still answered and the response queue is flushed best-effort.
    pub async fn run(&self) -> Result<(), UdpEngineError> {
        let mut requests: VecDeque<(Vec<u8>, SocketAddr)> = VecDeque::new();
        let mut responses: VecDeque<(Bytes, SocketAddr)> = VecDeque::new();
        // One spare byte so an oversize datagram is detectable rather than
        // silently truncated.
        let mut buf = [0u8; RECV_BUFFER_SIZE + 1];

        loop {
            let interest = if responses.is_empty() {
                Interest::READABLE
            } else {
                Interest::READABLE | Interest::WRITABLE
            };

            let ready = tokio::select! {
                _ = self.stop.cancelled() => break,
                res = self.socket.ready(interest) => {
                    res.map_err(UdpEngineError::Readiness)?
                },
            };

            if ready.is_readable() {
                self.drain_socket(&mut buf, &mut requests);
            }

            if ready.is_writable() {
                self.send_pending(&mut responses);
            }

            for _ in 0..MAX_BATCH {
                let Some((datagram, peer)) = requests.pop_front() else {
                    break;
                };
                responses.push_back((self.verdict(&datagram), peer));
            }
        }

        debug!(
            pending_requests = requests.len(),
            pending_responses = responses.len(),
            "UDP engine stopping"
        );

        // Answer everything already read, then flush without a readiness
        // wait.
        while let Some((datagram, peer)) = requests.pop_front() {
            responses.push_back((self.verdict(&datagram), peer));
        }
        let mut retries = 0;
        while !responses.is_empty() && retries < MAX_FLUSH_RETRIES {
            self.send_pending(&mut responses);
            if !responses.is_empty() {
                retries += 1;
                tokio::task::yield_now().await;
            }
        }
        if !responses.is_empty() {
            warn!(dropped = responses.len(), "responses unsent at shutdown");
        }

        info!("UDP engine stopped");
        Ok(())
    }

    /// `recv_from` until the socket would block.
    fn drain_socket(
        &self,
        buf: &mut [u8],
        requests: &mut VecDeque<(Vec<u8>, SocketAddr)>,
    ) {
        loop {
            match self.socket.try_recv_from(buf) {
                Ok((0, peer)) => {
                    debug!(%peer, "ignoring empty datagram");
                },
                Ok((n, peer)) if n > RECV_BUFFER_SIZE => {
                    warn!(%peer, len = n, "datagram exceeds receive buffer, dropped");
                },
                Ok((n, peer)) => {
                    requests.push_back((buf[..n].to_vec(), peer));
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("recv error: {e}");
                    break;
                },
            }
        }
    }

    /// `send_to` until the queue is empty or the socket would block. A
    /// blocked response stays at the queue front; in the main loop the
    /// still-registered write interest resumes it next tick.
    fn send_pending(&self, responses: &mut VecDeque<(Bytes, SocketAddr)>) {
        while let Some((payload, peer)) = responses.pop_front() {
            match self.socket.try_send_to(&payload, peer) {
                Ok(_) => {},
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    responses.push_front((payload, peer));
                    break;
                },
                Err(e) => {
                    warn!(%peer, "failed to send response, dropped: {e}");
                },
            }
        }
    }

    fn verdict(&self, datagram: &[u8]) -> Bytes {
        match self.handler.handle(datagram) {
            Ok(verdict) => Bytes::from_static(verdict.as_bytes()),
            Err(e) => Bytes::from(format!("Error: {e}")),
        }
    }
}
