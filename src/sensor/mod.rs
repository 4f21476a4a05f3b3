// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Soil probe reader
//!
//! The probe exposes two register panels read with function 0x03:
//!
//! | register | content        | scaling               |
//! |----------|----------------|-----------------------|
//! | 0x0000   | moisture       | %, ÷10                |
//! | 0x0001   | temperature    | °C, signed, ÷10       |
//! | 0x0002   | conductivity   | µS/cm, raw            |
//! | 0x0003   | pH             | ÷10                   |
//! | 0x0006   | nitrogen       | mg/kg, raw            |
//! | 0x0007   | phosphorus     | mg/kg, raw            |
//! | 0x0008   | potassium      | mg/kg, raw            |
//!
//! The basic panel (0x0000..0x0003) decides whether a sample is usable. The
//! NPK panel (0x0006..0x0008) is read in a separate transaction and only
//! flags its own validity.

pub mod recovery;

use std::time::Instant;

use log::{debug, warn};
use serde::Serialize;

use crate::modbus::{ModbusMaster, SerialTransport};
pub use recovery::{FailureCounter, FailureRecovery, RecoveryAction, RecoveryPolicy};

pub const BASIC_PANEL_LEN: u16 = 4;
pub const NPK_PANEL_LEN: u16 = 3;

/// One reading of both panels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SensorSample {
    /// Volumetric moisture, %.
    pub moisture: f32,
    /// Soil temperature, °C.
    pub temperature: f32,
    /// Electrical conductivity, µS/cm.
    pub conductivity: u16,
    pub ph: f32,
    /// mg/kg
    pub nitrogen: u16,
    /// mg/kg
    pub phosphorus: u16,
    /// mg/kg
    pub potassium: u16,
    pub basic_valid: bool,
    pub npk_valid: bool,
}

impl SensorSample {
    /// Apply the four basic panel registers.
    pub fn apply_basic(&mut self, registers: &[u16]) {
        if let [moisture, temperature, conductivity, ph] = registers {
            self.moisture = f32::from(*moisture) / 10.0;
            self.temperature = f32::from(*temperature as i16) / 10.0;
            self.conductivity = *conductivity;
            self.ph = f32::from(*ph) / 10.0;
            self.basic_valid = true;
        }
    }

    /// Apply the three NPK panel registers.
    pub fn apply_npk(&mut self, registers: &[u16]) {
        if let [nitrogen, phosphorus, potassium] = registers {
            self.nitrogen = *nitrogen;
            self.phosphorus = *phosphorus;
            self.potassium = *potassium;
            self.npk_valid = true;
        }
    }

    /// Both panels were read successfully.
    pub fn is_complete(&self) -> bool {
        self.basic_valid && self.npk_valid
    }
}

/// Where the probe lives on the bus.
#[derive(Debug, Clone, Copy)]
pub struct RegisterMap {
    pub slave: u8,
    pub basic_start: u16,
    pub npk_start: u16,
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self {
            slave: 0x01,
            basic_start: 0x0000,
            npk_start: 0x0006,
        }
    }
}

/// Reads both panels and applies the recovery policy.
///
/// Owned by the acquisition worker together with the bus it talks to.
pub struct SoilSensorReader<T: SerialTransport> {
    master: ModbusMaster<T>,
    map: RegisterMap,
    recovery: FailureRecovery,
}

impl<T: SerialTransport> SoilSensorReader<T> {
    pub fn new(master: ModbusMaster<T>, map: RegisterMap, recovery: FailureRecovery) -> Self {
        Self {
            master,
            map,
            recovery,
        }
    }

    pub fn recovery(&self) -> &FailureRecovery {
        &self.recovery
    }

    pub fn master_mut(&mut self) -> &mut ModbusMaster<T> {
        &mut self.master
    }

    /// Read the basic panel, then the NPK panel.
    ///
    /// A failed basic read is reported to the recovery policy and the NPK
    /// panel is skipped. A successful basic read clears the failure count
    /// whatever the NPK outcome.
    pub fn read(&mut self, now: Instant) -> SensorSample {
        let mut sample = SensorSample::default();

        match self
            .master
            .read(self.map.slave, self.map.basic_start, BASIC_PANEL_LEN)
        {
            Ok(registers) => sample.apply_basic(&registers),
            Err(e) => {
                warn!("Basic panel read failed: {}", e);
                self.recovery.on_failure(now, &mut self.master);
                return sample;
            }
        }

        match self
            .master
            .read(self.map.slave, self.map.npk_start, NPK_PANEL_LEN)
        {
            Ok(registers) => sample.apply_npk(&registers),
            Err(e) => debug!("NPK panel read failed: {}", e),
        }

        self.recovery.on_success();
        sample
    }
}
