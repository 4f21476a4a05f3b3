// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::debug;

use super::transfer::MAX_LINK_PAYLOAD;
use super::Config;
use crate::modbus::master::MIN_TURNAROUND;
use crate::sensor::{BASIC_PANEL_LEN, NPK_PANEL_LEN};

/// JSON schema of the configuration file, embedded at build time.
pub const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./agni_soil_sensor --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;
    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;
    println!("{}", formatted_schema);
    Ok(())
}

/// Validates the configuration against rules the JSON schema cannot express.
///
/// # Validation Rules
///
/// - **Bus timing**: turnaround of at least 2 ms, response timeout longer
///   than one turnaround
/// - **Register map**: the basic and NPK panels must not overlap
/// - **Sample staleness**: a sample must stay usable for at least one
///   acquisition period
/// - **Chunking**: `chunk_size` must fit in one link notification
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    let min_turnaround = MIN_TURNAROUND.as_millis() as u64;
    if config.modbus.turnaround_ms < min_turnaround {
        anyhow::bail!(
            "modbus.turnaround_ms must be at least {} ms, got {}",
            min_turnaround,
            config.modbus.turnaround_ms
        );
    }
    if config.modbus.response_timeout_ms <= config.modbus.turnaround_ms {
        anyhow::bail!(
            "modbus.response_timeout_ms ({}) must exceed modbus.turnaround_ms ({})",
            config.modbus.response_timeout_ms,
            config.modbus.turnaround_ms
        );
    }

    if !(1..=247).contains(&config.sensor.slave_address) {
        anyhow::bail!(
            "sensor.slave_address must be between 1 and 247, got {}",
            config.sensor.slave_address
        );
    }
    let basic = panel_range(config.sensor.basic_start_register, BASIC_PANEL_LEN)
        .context("Basic panel runs past the register space")?;
    let npk = panel_range(config.sensor.npk_start_register, NPK_PANEL_LEN)
        .context("NPK panel runs past the register space")?;
    if basic.0 < npk.1 && npk.0 < basic.1 {
        anyhow::bail!(
            "Sensor panels overlap: basic {:#06x}..{:#06x}, npk {:#06x}..{:#06x}",
            basic.0,
            basic.1,
            npk.0,
            npk.1
        );
    }

    if config.acquisition.stale_after_ms < config.acquisition.interval_ms {
        anyhow::bail!(
            "acquisition.stale_after_ms ({}) is shorter than acquisition.interval_ms ({})",
            config.acquisition.stale_after_ms,
            config.acquisition.interval_ms
        );
    }

    if config.transfer.chunk_size == 0 || config.transfer.chunk_size > MAX_LINK_PAYLOAD {
        anyhow::bail!(
            "transfer.chunk_size must be between 1 and {}, got {}",
            MAX_LINK_PAYLOAD,
            config.transfer.chunk_size
        );
    }

    if config.storage.data_dir.trim().is_empty() {
        anyhow::bail!("storage.data_dir must not be empty");
    }

    if config.watchdog.check_interval_ms >= config.watchdog.timeout_ms {
        anyhow::bail!(
            "watchdog.check_interval_ms ({}) must be shorter than watchdog.timeout_ms ({})",
            config.watchdog.check_interval_ms,
            config.watchdog.timeout_ms
        );
    }

    Ok(())
}

/// Half-open register range of a panel.
fn panel_range(start: u16, len: u16) -> Result<(u32, u32)> {
    let start = u32::from(start);
    let end = start + u32::from(len);
    if end > 0x1_0000 {
        anyhow::bail!("range {:#06x}+{} exceeds 0xFFFF", start, len);
    }
    Ok((start, end))
}
