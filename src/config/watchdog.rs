// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Watchdog and periodic report configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// A domain not fed for this long, in milliseconds, is reported as hung.
    pub timeout_ms: u64,

    /// Period of the supervisor check.
    pub check_interval_ms: u64,

    /// Period of the status line in the log.
    pub status_interval_ms: u64,

    /// Period of the storage health check.
    pub health_interval_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            check_interval_ms: 1_000,
            status_interval_ms: 10_000,
            health_interval_ms: 30_000,
        }
    }
}
