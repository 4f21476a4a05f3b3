// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Soil probe configuration

use serde::{Deserialize, Serialize};

/// Register layout of the probe and the bus recovery policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Modbus slave address of the probe (1-247).
    pub slave_address: u8,

    /// First register of the moisture/temperature/conductivity/pH panel.
    pub basic_start_register: u16,

    /// First register of the nitrogen/phosphorus/potassium panel.
    pub npk_start_register: u16,

    /// Consecutive failed reads before the bus is reset.
    pub failure_threshold: u32,

    /// Minimum time between two bus resets, in milliseconds.
    pub reset_cooldown_ms: u64,

    /// Answer from an in-process simulated probe instead of the serial port.
    pub simulated: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            slave_address: 1,
            basic_start_register: 0x0000,
            npk_start_register: 0x0006,
            failure_threshold: 5,
            reset_cooldown_ms: 10_000,
            simulated: false,
        }
    }
}
