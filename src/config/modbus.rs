// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Probe bus configuration
//!
//! Serial line and transaction timing of the RS-485 Modbus RTU link to the
//! soil probe.

use serde::{Deserialize, Serialize};

/// Configuration for the RS-485 bus the soil probe hangs on.
///
/// # Example
///
/// ```
/// use agni_soil_sensor::config::ModbusConfig;
///
/// let modbus_config = ModbusConfig {
///     port: "/dev/ttyAMA0".to_string(),
///     baud_rate: 9600,
///     ..ModbusConfig::default()
/// };
/// assert_eq!(modbus_config.response_timeout_ms, 800);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    /// Serial device of the RS-485 adapter.
    pub port: String,

    /// Line speed, 8N1 framing. The probe ships at 4800 baud.
    pub baud_rate: u32,

    /// Drive the transceiver DE/RE line with RTS.
    ///
    /// Disable for adapters that switch direction on their own.
    pub rts_direction_control: bool,

    /// How long to wait for a response, in milliseconds.
    pub response_timeout_ms: u64,

    /// Settle time around each direction change, in milliseconds. At least 2.
    pub turnaround_ms: u64,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 4800,
            rts_direction_control: true,
            response_timeout_ms: 800,
            turnaround_ms: 10,
        }
    }
}
