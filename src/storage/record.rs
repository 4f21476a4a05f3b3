// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Persisted analysis record
//!
//! One [`LogRecord`] is written per completed analysis. The JSON layout is
//! what the companion application parses, so field names and the no-fix
//! sentinels are part of the external interface.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::location::LocationFix;
use crate::sensor::SensorSample;

/// `timestamp` when no satellite time is available.
pub const NO_FIX_TIMESTAMP: &str = "0000-00-00T00:00:00Z";
/// `time_utc` when no satellite time is available.
pub const NO_FIX_TIME_UTC: &str = "00:00:00";
/// `date_ist` when no satellite time is available.
pub const NO_FIX_DATE_IST: &str = "0000-00-00";
/// `time_ist` when no satellite time is available.
pub const NO_FIX_TIME_IST: &str = "00:00 AM";

/// India Standard Time, UTC+5:30.
const IST_OFFSET_SECONDS: i64 = 5 * 3600 + 30 * 60;

/// Soil reaction class derived from the pH value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhCategory {
    Acidic,
    SlightlyAcidic,
    Neutral,
    SlightlyAlkaline,
    Alkaline,
}

impl PhCategory {
    pub fn from_ph(ph: f32) -> Self {
        if ph < 5.5 {
            PhCategory::Acidic
        } else if ph < 6.5 {
            PhCategory::SlightlyAcidic
        } else if ph < 7.5 {
            PhCategory::Neutral
        } else if ph < 8.5 {
            PhCategory::SlightlyAlkaline
        } else {
            PhCategory::Alkaline
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub valid: bool,
    pub satellites: u32,
    pub altitude: f64,
    pub speed_kmh: f64,
    pub hdop: f64,
}

impl From<&LocationFix> for RecordLocation {
    fn from(fix: &LocationFix) -> Self {
        if !fix.valid {
            return Self {
                latitude: 0.0,
                longitude: 0.0,
                valid: false,
                satellites: 0,
                altitude: 0.0,
                speed_kmh: 0.0,
                hdop: 0.0,
            };
        }
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            valid: true,
            satellites: fix.satellites,
            altitude: fix.altitude_m,
            speed_kmh: fix.speed_kmh,
            hdop: fix.hdop,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordParameters {
    pub ph_value: f32,
    pub conductivity: u16,
    pub nitrogen: u16,
    pub phosphorus: u16,
    pub potassium: u16,
    pub moisture: f32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: u64,
    pub timestamp: String,
    pub time_utc: String,
    pub date_ist: String,
    pub time_ist: String,
    pub location: RecordLocation,
    pub ph_category: PhCategory,
    pub parameters: RecordParameters,
    pub sensor_valid: bool,
}

impl LogRecord {
    /// Assemble a record from the sample and location held at analysis
    /// expiry.
    pub fn new(id: u64, sample: &SensorSample, fix: &LocationFix) -> Self {
        let clock = fix.utc.filter(|_| fix.valid);
        let (timestamp, time_utc, date_ist, time_ist) = match clock {
            Some(utc) => {
                let (date_ist, time_ist) = ist_date_time(utc);
                (
                    utc.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    utc.format("%H:%M:%S").to_string(),
                    date_ist,
                    time_ist,
                )
            }
            None => (
                NO_FIX_TIMESTAMP.to_string(),
                NO_FIX_TIME_UTC.to_string(),
                NO_FIX_DATE_IST.to_string(),
                NO_FIX_TIME_IST.to_string(),
            ),
        };

        Self {
            id,
            timestamp,
            time_utc,
            date_ist,
            time_ist,
            location: RecordLocation::from(fix),
            ph_category: PhCategory::from_ph(sample.ph),
            parameters: RecordParameters {
                ph_value: sample.ph,
                conductivity: sample.conductivity,
                nitrogen: sample.nitrogen,
                phosphorus: sample.phosphorus,
                potassium: sample.potassium,
                moisture: sample.moisture,
                temperature: sample.temperature,
            },
            sensor_valid: sample.basic_valid && sample.npk_valid,
        }
    }
}

/// IST date (`YYYY-MM-DD`) and 12-hour time (`hh:mm AM|PM`).
pub fn ist_date_time(utc: DateTime<Utc>) -> (String, String) {
    let ist = utc.naive_utc() + TimeDelta::seconds(IST_OFFSET_SECONDS);
    (
        ist.format("%Y-%m-%d").to_string(),
        ist.format("%I:%M %p").to_string(),
    )
}
