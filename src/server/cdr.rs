// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Durable Call Detail Record writer.
//!
//! One line per lifecycle event, append mode, flushed per record:
//!
//! ```text
//! 2025-01-15 14:22:07.123, 001010123456789, created
//! ```

use core::fmt;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::{Context, Result};
use tracing::error;

use crate::{server::bus::EventBus, utils::current_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdrAction {
    Created,
    Deleted,
    Rejected,
}

impl fmt::Display for CdrAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CdrAction::Created => "created",
            CdrAction::Deleted => "deleted",
            CdrAction::Rejected => "rejected",
        })
    }
}

pub struct CdrWriter {
    file: Mutex<File>,
}

impl CdrWriter {
    /// Opens the CDR file in append mode. Failure here is fatal for the
    /// server startup.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| {
                format!("cannot open CDR file: {}", path.as_ref().display())
            })?;

        Ok(Arc::new(Self {
            file: Mutex::new(file),
        }))
    }

    /// Appends one record and flushes it. Errors after a successful open are
    /// logged, never propagated into the event path.
    pub fn write_record(&self, imsi: &str, action: CdrAction) {
        let line = format!("{}, {}, {}\n", current_timestamp(), imsi, action);

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = file
            .write_all(line.as_bytes())
            .and_then(|()| file.flush())
        {
            error!(imsi, %action, "failed to write CDR record: {e}");
        }
    }

    /// Registers this writer for all three session lifecycle events.
    pub fn subscribe(self: &Arc<Self>, bus: &EventBus) {
        let writer = self.clone();
        bus.subscribe_created(move |imsi| {
            writer.write_record(&imsi, CdrAction::Created);
        });

        let writer = self.clone();
        bus.subscribe_deleted(move |imsi| {
            writer.write_record(&imsi, CdrAction::Deleted);
        });

        let writer = self.clone();
        bus.subscribe_rejected(move |imsi| {
            writer.write_record(&imsi, CdrAction::Rejected);
        });
    }
}
