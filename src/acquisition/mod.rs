// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Soil probe acquisition domain
//!
//! Everything that blocks on the RS-485 bus lives here, away from the control
//! loop.
//!
//! ## Components
//!
//! * [`channel`]: single-slot handoff of the latest sample to the control
//!   domain.
//! * [`AcquisitionWorker`]: the polling loop, run on a blocking thread.
//! * [`simulated`]: an in-process probe for bench runs without hardware.
//!
//! The factory functions below build a [`SoilSensorReader`] from the
//! configuration, either on a real serial adapter or on the simulated probe.

pub mod channel;
pub mod simulated;
pub mod worker;

use std::time::{Duration, Instant};

use log::warn;

use crate::config::Config;
use crate::modbus::{MasterSettings, ModbusMaster, SerialPortTransport, SerialSettings};
use crate::sensor::{FailureRecovery, RecoveryPolicy, RegisterMap, SoilSensorReader};
pub use channel::{channel, SamplePublisher, SampleReceiver};
pub use simulated::{ProbeControl, ProbeFault, SimulatedSoilProbe, SoilReading};
pub use worker::AcquisitionWorker;

fn master_settings(config: &Config) -> MasterSettings {
    MasterSettings {
        response_timeout: Duration::from_millis(config.modbus.response_timeout_ms),
        turnaround: Duration::from_millis(config.modbus.turnaround_ms),
    }
}

fn register_map(config: &Config) -> RegisterMap {
    RegisterMap {
        slave: config.sensor.slave_address,
        basic_start: config.sensor.basic_start_register,
        npk_start: config.sensor.npk_start_register,
    }
}

fn recovery(config: &Config, boot: Instant) -> FailureRecovery {
    FailureRecovery::new(
        RecoveryPolicy {
            threshold: config.sensor.failure_threshold,
            cooldown: Duration::from_millis(config.sensor.reset_cooldown_ms),
        },
        boot,
    )
}

/// Open the configured serial adapter and wrap it in a reader.
///
/// A missing or busy adapter does not stop the instrument: the reader starts
/// with the bus closed, every poll fails, and the failure recovery reopens the
/// device once the threshold and cooldown allow it.
pub fn open_probe_reader(config: &Config, boot: Instant) -> SoilSensorReader<SerialPortTransport> {
    let settings = SerialSettings {
        path: config.modbus.port.clone(),
        baud_rate: config.modbus.baud_rate,
        rts_direction_control: config.modbus.rts_direction_control,
    };
    let transport = match SerialPortTransport::open(settings.clone()) {
        Ok(transport) => transport,
        Err(e) => {
            warn!(
                "Probe bus {} unavailable ({}), polling will retry after bus resets",
                config.modbus.port, e
            );
            SerialPortTransport::closed(settings)
        }
    };

    SoilSensorReader::new(
        ModbusMaster::new(transport, master_settings(config)),
        register_map(config),
        recovery(config, boot),
    )
}

/// Build a reader on a simulated probe answering at the configured address.
pub fn simulated_probe_reader(
    config: &Config,
    boot: Instant,
) -> (SoilSensorReader<SimulatedSoilProbe>, ProbeControl) {
    let (probe, control) = SimulatedSoilProbe::new(config.sensor.slave_address);
    control.set_jitter(true);
    let reader = SoilSensorReader::new(
        ModbusMaster::new(probe, master_settings(config)),
        register_map(config),
        recovery(config, boot),
    );
    (reader, control)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_adapter_degrades_to_failed_reads() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.modbus.port = dir.path().join("ttyNONE").to_string_lossy().into_owned();
        config.sensor.failure_threshold = 2;
        config.sensor.reset_cooldown_ms = 0;

        let boot = Instant::now();
        let mut reader = open_probe_reader(&config, boot);
        assert!(!reader.master_mut().transport().is_open());

        let sample = reader.read(boot);
        assert!(!sample.basic_valid);
        assert_eq!(reader.recovery().counter().consecutive_failures, 1);

        // The second failure reaches the threshold; the reopen attempt fails
        // too and the bus stays closed.
        assert!(!reader.read(boot).basic_valid);
        assert_eq!(reader.recovery().resets(), 1);
        assert_eq!(reader.recovery().counter().consecutive_failures, 0);
        assert!(!reader.master_mut().transport().is_open());
    }
}
