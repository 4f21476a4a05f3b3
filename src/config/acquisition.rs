// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Data acquisition configuration

use serde::{Deserialize, Serialize};

/// Polling cadence of the acquisition domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Time interval in milliseconds between two probe reads.
    pub interval_ms: u64,

    /// Age in milliseconds after which the control loop no longer trusts
    /// the latest sample. Must not be shorter than `interval_ms`.
    pub stale_after_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            stale_after_ms: 15_000,
        }
    }
}
