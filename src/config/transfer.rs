// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Wireless offload configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transfer::TransferSettings;

/// Largest payload the radio link accepts in one notification.
pub const MAX_LINK_PAYLOAD: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes of record content per notification.
    pub chunk_size: usize,

    /// Minimum spacing between two notifications, in milliseconds.
    pub chunk_interval_ms: u64,

    /// Start an offload on its own once a client has been connected for
    /// `auto_start_delay_ms`.
    pub auto_start: bool,

    pub auto_start_delay_ms: u64,

    /// Capacity of the queue between the radio callbacks and the control loop.
    pub event_queue_capacity: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256,
            chunk_interval_ms: 5,
            auto_start: true,
            auto_start_delay_ms: 5_000,
            event_queue_capacity: 16,
        }
    }
}

impl TransferConfig {
    pub fn settings(&self) -> TransferSettings {
        TransferSettings {
            chunk_size: self.chunk_size,
            chunk_interval: Duration::from_millis(self.chunk_interval_ms),
            auto_start: self.auto_start,
            auto_start_delay: Duration::from_millis(self.auto_start_delay_ms),
        }
    }
}
