// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Satellite positioning snapshot
//!
//! NMEA parsing belongs to the receiver driver; the core only consumes a
//! [`LocationFix`] snapshot through the [`LocationSource`] trait.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Position and UTC time as last reported by the receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub satellites: u32,
    pub speed_kmh: f64,
    pub hdop: f64,
    pub valid: bool,
    pub utc: Option<DateTime<Utc>>,
}

impl LocationFix {
    /// A fix with no position and no time.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Provider of location snapshots, polled by the control loop.
pub trait LocationSource: Send {
    fn snapshot(&mut self) -> LocationFix;
}

/// Receiver that never acquires a fix.
#[derive(Debug, Default)]
pub struct NoFixSource;

impl LocationSource for NoFixSource {
    fn snapshot(&mut self) -> LocationFix {
        LocationFix::none()
    }
}

/// Fixed position with the host clock as UTC time.
///
/// Stands in for a receiver on bench setups.
#[derive(Debug, Clone)]
pub struct StaticLocation {
    fix: LocationFix,
}

impl StaticLocation {
    pub fn new(latitude: f64, longitude: f64, altitude_m: f64, satellites: u32, hdop: f64) -> Self {
        Self {
            fix: LocationFix {
                latitude,
                longitude,
                altitude_m,
                satellites,
                speed_kmh: 0.0,
                hdop,
                valid: true,
                utc: None,
            },
        }
    }
}

impl LocationSource for StaticLocation {
    fn snapshot(&mut self) -> LocationFix {
        LocationFix {
            utc: Some(Utc::now()),
            ..self.fix
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_location_is_valid_with_time() {
        let mut source = StaticLocation::new(18.52, 73.85, 560.0, 9, 0.9);
        let fix = source.snapshot();
        assert!(fix.valid);
        assert!(fix.utc.is_some());
        assert_eq!(fix.satellites, 9);
    }

    #[test]
    fn test_no_fix() {
        let fix = NoFixSource.snapshot();
        assert!(!fix.valid);
        assert!(fix.utc.is_none());
    }
}
