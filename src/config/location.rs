// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Positioning configuration

use serde::{Deserialize, Serialize};

use crate::location::{LocationSource, NoFixSource, StaticLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMode {
    /// No receiver: records carry the no-fix sentinels.
    None,
    /// Fixed surveyed position, stamped with the host clock.
    Static,
}

/// Where location fixes come from.
///
/// The coordinates are only used in `static` mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub mode: LocationMode,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub satellites: u32,
    pub hdop: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            mode: LocationMode::None,
            latitude: 0.0,
            longitude: 0.0,
            altitude_m: 0.0,
            satellites: 0,
            hdop: 0.0,
        }
    }
}

impl LocationConfig {
    pub fn source(&self) -> Box<dyn LocationSource> {
        match self.mode {
            LocationMode::None => Box::new(NoFixSource),
            LocationMode::Static => Box::new(StaticLocation::new(
                self.latitude,
                self.longitude,
                self.altitude_m,
                self.satellites,
                self.hdop,
            )),
        }
    }
}
