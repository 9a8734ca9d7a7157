// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use chrono::Local;

/// Returns the current local time formatted for CDR records:
/// `YYYY-MM-DD HH:MM:SS.mmm` (millisecond resolution).
pub fn current_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}
