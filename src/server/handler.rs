// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Admission decision for a single datagram.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    models::bcd::decode_imsi,
    server::{
        bus::{EventBus, SessionEvent},
        registry::SessionRegistry,
    },
};

pub const VERDICT_CREATED: &str = "created";
pub const VERDICT_REJECTED: &str = "rejected";

/// Errors surfaced to the UDP peer as `Error: <kind>`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PacketManagerError {
    #[error("packet_parsing_failed")]
    PacketParsingFailed,
}

pub struct PacketHandler {
    registry: Arc<SessionRegistry>,
    bus: Arc<EventBus>,
}

impl PacketHandler {
    pub fn new(registry: Arc<SessionRegistry>, bus: Arc<EventBus>) -> Self {
        Self { registry, bus }
    }

    /// Decodes one datagram and produces the verdict that becomes the UDP
    /// reply body. Blacklisted and duplicate IMSIs are rejections, not
    /// errors; only an undecodable datagram is.
    pub fn handle(&self, datagram: &[u8]) -> Result<&'static str, PacketManagerError> {
        let imsi = match decode_imsi(datagram) {
            Ok(imsi) => imsi,
            Err(e) => {
                warn!("failed to decode datagram: {e}");
                return Err(PacketManagerError::PacketParsingFailed);
            },
        };

        if self.registry.is_blacklisted(&imsi) {
            debug!(%imsi, "blacklisted IMSI rejected");
            self.bus.publish(SessionEvent::Rejected { imsi });
            return Ok(VERDICT_REJECTED);
        }

        match self.registry.create_session(&imsi) {
            Some(session) => {
                debug!(imsi = session.imsi(), "session created");
                self.bus.publish(SessionEvent::Created { imsi });
                Ok(VERDICT_CREATED)
            },
            None => {
                debug!(%imsi, "duplicate IMSI rejected");
                self.bus.publish(SessionEvent::Rejected { imsi });
                Ok(VERDICT_REJECTED)
            },
        }
    }
}
