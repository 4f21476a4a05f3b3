// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the soil sensor
//!
//! This module loads, validates and applies the configuration of the
//! instrument. The configuration is backed by a YAML file and validated against
//! a JSON schema embedded in the binary.
//!
//! ## Configuration Structure
//!
//! - `modbus`: serial line and transaction timing of the probe bus
//! - `sensor`: probe register layout and bus recovery policy
//! - `acquisition`: polling cadence and sample staleness
//! - `flow`: duration of each screen of the operating flow
//! - `transfer`: wireless offload chunking and pacing
//! - `storage`: record directory
//! - `location`: positioning source
//! - `watchdog`: liveness deadline and periodic reports
//!
//! ## Usage
//!
//! ```no_run
//! use agni_soil_sensor::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some("/dev/ttyUSB1".to_string()), // Serial port
//!     Some(9600),                       // Baud rate
//!     None,                             // Data directory
//!     false,                            // Simulated probe
//! );
//!
//! println!("Probe bus: {}", config.modbus.port);
//! ```

pub mod acquisition;
pub mod flow;
pub mod location;
pub mod modbus;
pub mod sensor;
pub mod storage;
pub mod transfer;
pub mod utils;
pub mod watchdog;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use acquisition::AcquisitionConfig;
pub use flow::FlowConfig;
pub use location::{LocationConfig, LocationMode};
pub use modbus::ModbusConfig;
pub use sensor::SensorConfig;
pub use storage::StorageConfig;
pub use transfer::TransferConfig;
pub use utils::{output_config_schema, validate_specific_rules};
pub use watchdog::WatchdogConfig;

/// Root configuration structure.
///
/// Every section falls back to its defaults when missing from the file, so a
/// minimal configuration only lists what differs from the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Serial line and timing of the probe bus.
    #[serde(default)]
    pub modbus: ModbusConfig,

    /// Probe register layout and recovery policy.
    #[serde(default)]
    pub sensor: SensorConfig,

    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Screen durations of the operating flow.
    #[serde(default)]
    pub flow: FlowConfig,

    /// Wireless offload settings.
    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub location: LocationConfig,

    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    ///
    /// A missing file is created with the default values. An existing file is
    /// validated against the embedded schema, then against
    /// [`validate_specific_rules`]; on failure a `*.sample.yaml` with the
    /// defaults is written next to it and an error is returned.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        // YAML goes through a generic value so it can be checked as JSON
        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;
        let json_value = serde_json::to_value(&yaml_value).with_context(|| {
            format!("Failed to convert YAML to JSON for validation: {:?}", path)
        })?;

        let schema: serde_json::Value = serde_json::from_str(utils::CONFIG_SCHEMA)
            .context("Failed to parse JSON schema")?;
        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        if let Err(err) = validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only arguments that were given override the file.
    ///
    /// # Parameters
    ///
    /// * `serial_port` - Serial device of the probe bus
    /// * `baud_rate` - Probe bus line speed
    /// * `data_dir` - Record directory
    /// * `simulate` - If true, answer from the simulated probe
    pub fn apply_args(
        &mut self,
        serial_port: Option<String>,
        baud_rate: Option<u32>,
        data_dir: Option<PathBuf>,
        simulate: bool,
    ) {
        if let Some(port) = serial_port {
            debug!("Overriding serial port from command line: {}", port);
            self.modbus.port = port;
        }
        if let Some(baud_rate) = baud_rate {
            debug!("Overriding baud rate from command line: {}", baud_rate);
            self.modbus.baud_rate = baud_rate;
        }
        if let Some(dir) = data_dir {
            debug!("Overriding data directory from command line: {:?}", dir);
            self.storage.data_dir = dir.to_string_lossy().to_string();
        }
        if simulate {
            debug!("Using the simulated probe");
            self.sensor.simulated = true;
        }
    }
}
