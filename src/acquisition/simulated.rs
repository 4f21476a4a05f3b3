// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! In-process simulated soil probe
//!
//! [`SimulatedSoilProbe`] is a [`SerialTransport`] that behaves like the
//! probe at the far end of the RS-485 segment: it decodes each read request
//! written to it and queues the matching response for the master to read.
//! It is used for bench runs without hardware (`--simulate`) and by tests.
//!
//! A [`ProbeControl`] handle, cloned freely, changes the reading and injects
//! faults while the probe is owned by the acquisition worker.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, trace};
use rand::Rng;

use crate::modbus::frame::{self, READ_HOLDING_REGISTERS};
use crate::modbus::SerialTransport;

/// Size of the simulated register bank (0x0000..=0x0008).
const REGISTER_COUNT: usize = 9;

/// Engineering values served by the probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoilReading {
    pub moisture: f32,
    pub temperature: f32,
    pub conductivity: u16,
    pub ph: f32,
    pub nitrogen: u16,
    pub phosphorus: u16,
    pub potassium: u16,
}

impl Default for SoilReading {
    fn default() -> Self {
        Self {
            moisture: 45.2,
            temperature: 24.5,
            conductivity: 850,
            ph: 6.8,
            nitrogen: 42,
            phosphorus: 18,
            potassium: 155,
        }
    }
}

impl SoilReading {
    fn to_registers(self) -> [u16; REGISTER_COUNT] {
        [
            (self.moisture * 10.0).round() as u16,
            ((self.temperature * 10.0).round() as i16) as u16,
            self.conductivity,
            (self.ph * 10.0).round() as u16,
            0,
            0,
            self.nitrogen,
            self.phosphorus,
            self.potassium,
        ]
    }
}

/// Misbehaviour applied to upcoming requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFault {
    /// No answer at all.
    Silent,
    /// Answer with a flipped CRC byte.
    CorruptCrc,
    /// Answer with an exception code.
    Exception(u8),
}

#[derive(Debug)]
struct ProbeState {
    reading: SoilReading,
    jitter: bool,
    offline: bool,
    npk_offline: bool,
    faults: VecDeque<ProbeFault>,
    requests: usize,
    reopens: usize,
}

/// Remote control for a [`SimulatedSoilProbe`].
#[derive(Debug, Clone)]
pub struct ProbeControl {
    state: Arc<Mutex<ProbeState>>,
}

impl ProbeControl {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_reading(&self, reading: SoilReading) {
        self.lock().reading = reading;
    }

    /// Add small random variations to moisture and temperature.
    pub fn set_jitter(&self, jitter: bool) {
        self.lock().jitter = jitter;
    }

    /// Stop answering entirely, like a disconnected probe.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Stop answering NPK panel requests only.
    pub fn set_npk_offline(&self, offline: bool) {
        self.lock().npk_offline = offline;
    }

    /// Apply `fault` to the next `count` requests.
    pub fn inject(&self, fault: ProbeFault, count: usize) {
        let mut state = self.lock();
        state.faults.extend(std::iter::repeat(fault).take(count));
    }

    /// Requests received, including the ignored ones.
    pub fn requests(&self) -> usize {
        self.lock().requests
    }

    /// How many times the master reopened the bus.
    pub fn reopens(&self) -> usize {
        self.lock().reopens
    }
}

/// Simulated probe answering on the master's transport.
#[derive(Debug)]
pub struct SimulatedSoilProbe {
    slave: u8,
    state: Arc<Mutex<ProbeState>>,
    pending: VecDeque<u8>,
    driving: bool,
}

impl SimulatedSoilProbe {
    pub fn new(slave: u8) -> (Self, ProbeControl) {
        let state = Arc::new(Mutex::new(ProbeState {
            reading: SoilReading::default(),
            jitter: false,
            offline: false,
            npk_offline: false,
            faults: VecDeque::new(),
            requests: 0,
            reopens: 0,
        }));
        let probe = Self {
            slave,
            state: state.clone(),
            pending: VecDeque::new(),
            driving: false,
        };
        (probe, ProbeControl { state })
    }

    fn answer(&self, request: &[u8]) -> Option<Vec<u8>> {
        let (slave, start, count) = frame::parse_read_request(request)?;
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.requests += 1;

        if slave != self.slave || state.offline {
            return None;
        }
        let end = usize::from(start) + usize::from(count);
        if state.npk_offline && start >= 0x0006 {
            return None;
        }

        let response = match state.faults.pop_front() {
            Some(ProbeFault::Silent) => return None,
            Some(ProbeFault::Exception(code)) => {
                frame::build_exception_response(slave, READ_HOLDING_REGISTERS, code)
            }
            Some(ProbeFault::CorruptCrc) | None if end > REGISTER_COUNT || count == 0 => {
                frame::build_exception_response(slave, READ_HOLDING_REGISTERS, 0x02)
            }
            fault => {
                let mut registers = state.reading.to_registers();
                if state.jitter {
                    let mut rng = rand::rng();
                    registers[0] = registers[0].saturating_add_signed(rng.random_range(-5..=5));
                    registers[1] = registers[1].wrapping_add_signed(rng.random_range(-3..=3));
                }
                let mut response =
                    frame::build_read_response(slave, &registers[usize::from(start)..end]);
                if fault == Some(ProbeFault::CorruptCrc) {
                    let last = response.len() - 1;
                    response[last] ^= 0xFF;
                }
                response
            }
        };
        Some(response)
    }
}

impl SerialTransport for SimulatedSoilProbe {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.driving {
            debug!("Simulated probe: bytes written while the transceiver is receiving");
            return Ok(());
        }
        trace!("Simulated probe RX {}", frame::hex_dump(bytes));
        if let Some(response) = self.answer(bytes) {
            self.pending.extend(response);
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if self.pending.is_empty() {
            thread::sleep(timeout);
            return Ok(0);
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        Ok(())
    }

    fn set_drive(&mut self, drive: bool) -> io::Result<()> {
        self.driving = drive;
        Ok(())
    }

    fn reopen(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.driving = false;
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .reopens += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::{BusError, MasterSettings, ModbusMaster};
    use crate::sensor::{FailureRecovery, RecoveryPolicy, RegisterMap, SoilSensorReader};
    use std::time::Instant;

    fn settings() -> MasterSettings {
        MasterSettings {
            response_timeout: Duration::from_millis(40),
            turnaround: Duration::from_millis(2),
        }
    }

    fn reader(probe: SimulatedSoilProbe, boot: Instant) -> SoilSensorReader<SimulatedSoilProbe> {
        SoilSensorReader::new(
            ModbusMaster::new(probe, settings()),
            RegisterMap::default(),
            FailureRecovery::new(RecoveryPolicy::default(), boot),
        )
    }

    #[test]
    fn test_reads_both_panels() {
        let (probe, control) = SimulatedSoilProbe::new(1);
        control.set_reading(SoilReading {
            ph: 9.0,
            ..SoilReading::default()
        });
        let mut reader = reader(probe, Instant::now());

        let sample = reader.read(Instant::now());
        assert!(sample.basic_valid && sample.npk_valid);
        assert!((sample.ph - 9.0).abs() < 1e-4);
        assert_eq!(sample.potassium, 155);
        assert_eq!(control.requests(), 2);
    }

    #[test]
    fn test_npk_failure_keeps_basic() {
        let (probe, control) = SimulatedSoilProbe::new(1);
        control.set_npk_offline(true);
        let mut reader = reader(probe, Instant::now());

        let sample = reader.read(Instant::now());
        assert!(sample.basic_valid);
        assert!(!sample.npk_valid);
        assert_eq!(reader.recovery().counter().consecutive_failures, 0);
    }

    #[test]
    fn test_basic_failure_skips_npk() {
        let (probe, control) = SimulatedSoilProbe::new(1);
        control.inject(ProbeFault::CorruptCrc, 1);
        let mut reader = reader(probe, Instant::now());

        let sample = reader.read(Instant::now());
        assert!(!sample.basic_valid);
        assert!(!sample.npk_valid);
        assert_eq!(control.requests(), 1);
        assert_eq!(reader.recovery().counter().consecutive_failures, 1);
    }

    #[test]
    fn test_dead_probe_triggers_one_reset_after_cooldown() {
        let (probe, control) = SimulatedSoilProbe::new(1);
        control.set_offline(true);
        let boot = Instant::now();
        let mut reader = reader(probe, boot);

        let later = boot + Duration::from_secs(10);
        for _ in 0..5 {
            reader.read(later);
        }
        assert_eq!(control.reopens(), 1);
        assert_eq!(reader.recovery().counter().consecutive_failures, 0);
    }

    #[test]
    fn test_wrong_slave_is_silent() {
        let (probe, _control) = SimulatedSoilProbe::new(2);
        let mut master = ModbusMaster::new(probe, settings());
        assert!(matches!(master.read(1, 0, 4), Err(BusError::Timeout { .. })));
    }

    #[test]
    fn test_out_of_range_is_exception() {
        let (probe, _control) = SimulatedSoilProbe::new(1);
        let mut master = ModbusMaster::new(probe, settings());
        assert!(matches!(
            master.read(1, 0x0008, 4),
            Err(BusError::Exception(0x02))
        ));
    }
}
