// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Client side of the admission exchange: one BCD datagram out, one verdict
//! back.

use std::{io, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::{net::UdpSocket, time::timeout};
use tracing::{debug, info, warn};

use crate::{cfg::config::Config, models::bcd::encode_imsi};

/// How long to wait for the server's verdict.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum UdpClientError {
    #[error("invalid_imsi_format")]
    InvalidImsiFormat,
    #[error("send_failed: {0}")]
    SendFailed(#[source] io::Error),
    #[error("receive_failed: {0}")]
    ReceiveFailed(#[source] io::Error),
    #[error("timeout")]
    Timeout,
}

pub struct UdpImsiClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    response_timeout: Duration,
}

impl UdpImsiClient {
    /// Binds an ephemeral local socket toward the configured server.
    pub async fn connect(cfg: &Config) -> Result<Self> {
        let server_addr = cfg.udp_addr()?;
        let bind_addr: SocketAddr = if server_addr.is_ipv4() {
            "0.0.0.0:0".parse().context("invalid IPv4 wildcard")?
        } else {
            "[::]:0".parse().context("invalid IPv6 wildcard")?
        };

        let socket = UdpSocket::bind(bind_addr)
            .await
            .context("failed to bind client UDP socket")?;
        info!(%server_addr, "UDP client initialized");

        Ok(Self {
            socket,
            server_addr,
            response_timeout: RESPONSE_TIMEOUT,
        })
    }

    /// Encodes and sends the IMSI, then waits for the verdict string.
    pub async fn send_imsi(&self, imsi: &str) -> Result<String, UdpClientError> {
        let datagram =
            encode_imsi(imsi).map_err(|_| UdpClientError::InvalidImsiFormat)?;
        debug!(payload = %hex::encode(&datagram), "sending IMSI datagram");

        let sent = self
            .socket
            .send_to(&datagram, self.server_addr)
            .await
            .map_err(UdpClientError::SendFailed)?;
        if sent != datagram.len() {
            return Err(UdpClientError::SendFailed(io::Error::other(format!(
                "partial send: {sent} of {} bytes",
                datagram.len()
            ))));
        }

        let reply = timeout(self.response_timeout, self.recv_reply())
            .await
            .map_err(|_| UdpClientError::Timeout)??;
        info!(%reply, "received server response");
        Ok(reply)
    }

    async fn recv_reply(&self) -> Result<String, UdpClientError> {
        let mut buf = [0u8; 1024];
        loop {
            let (n, from) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(UdpClientError::ReceiveFailed)?;

            if n == 0 {
                warn!(%from, "received empty datagram, ignoring");
                continue;
            }
            if from != self.server_addr {
                warn!(%from, "response from unexpected source, ignoring");
                continue;
            }

            return Ok(String::from_utf8_lossy(&buf[..n]).into_owned());
        }
    }
}
