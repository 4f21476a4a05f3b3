// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Operating flow timing

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::flow::FlowDurations;

/// Duration of each timed screen, in milliseconds, and the control loop
/// period.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub boot_ms: u64,
    pub self_check_ms: u64,
    /// Upper bound of the satellite search; a fix ends it earlier.
    pub gps_search_ms: u64,
    pub insert_prompt_ms: u64,
    pub countdown_ms: u64,
    pub analyzing_ms: u64,
    pub file_created_ms: u64,
    /// Control loop period.
    pub tick_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            boot_ms: 3_000,
            self_check_ms: 3_000,
            gps_search_ms: 10_000,
            insert_prompt_ms: 2_000,
            countdown_ms: 5_000,
            analyzing_ms: 45_000,
            file_created_ms: 3_000,
            tick_ms: 10,
        }
    }
}

impl FlowConfig {
    pub fn durations(&self) -> FlowDurations {
        FlowDurations {
            boot: Duration::from_millis(self.boot_ms),
            self_check: Duration::from_millis(self.self_check_ms),
            gps_search: Duration::from_millis(self.gps_search_ms),
            insert_prompt: Duration::from_millis(self.insert_prompt_ms),
            countdown: Duration::from_millis(self.countdown_ms),
            analyzing: Duration::from_millis(self.analyzing_ms),
            file_created: Duration::from_millis(self.file_created_ms),
        }
    }
}
