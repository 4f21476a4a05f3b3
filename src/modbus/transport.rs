// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Serial transport abstraction for the RS-485 segment
//!
//! The master never touches a serial device directly. It goes through the
//! [`SerialTransport`] trait so that the same transaction logic runs against
//! a USB RS-485 adapter, the simulated probe, or a test double.

use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use log::{debug, info};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

/// Byte stream with half-duplex direction control.
///
/// Implementations must be usable from a blocking worker thread.
pub trait SerialTransport: Send {
    /// Queue `bytes` for transmission.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Block until every queued byte has left the transmitter.
    fn flush(&mut self) -> io::Result<()>;

    /// Read whatever is available, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` when the timeout elapses without data.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Drop any stale bytes in the receive buffer.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Switch the transceiver between drive (`true`) and receive (`false`).
    fn set_drive(&mut self, drive: bool) -> io::Result<()>;

    /// Close and reopen the underlying device.
    fn reopen(&mut self) -> io::Result<()>;
}

/// Line settings for the probe bus.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
    /// Drive the transceiver DE/RE line through RTS. Adapters with automatic
    /// direction switching leave this off.
    pub rts_direction_control: bool,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            path: "/dev/ttyUSB0".to_string(),
            baud_rate: 4800,
            rts_direction_control: true,
        }
    }
}

/// [`SerialTransport`] over a host serial device, 8N1, no flow control.
pub struct SerialPortTransport {
    settings: SerialSettings,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortTransport {
    /// Open the device described by `settings`, leaving the transceiver in
    /// receive mode.
    pub fn open(settings: SerialSettings) -> io::Result<Self> {
        let mut transport = Self {
            settings,
            port: None,
        };
        transport.port = Some(transport.open_port()?);
        transport.set_drive(false)?;
        info!(
            "Opened probe bus on {} at {} baud",
            transport.settings.path, transport.settings.baud_rate
        );
        Ok(transport)
    }

    /// Transport for a device that could not be opened yet. Every transfer
    /// fails with `NotConnected` until [`SerialTransport::reopen`] succeeds.
    pub fn closed(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn open_port(&self) -> io::Result<Box<dyn SerialPort>> {
        let port = serialport::new(&self.settings.path, self.settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(10))
            .open()?;
        Ok(port)
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))
    }
}

impl SerialTransport for SerialPortTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port()?.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port()?.flush()
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let port = self.port()?;
        port.set_timeout(timeout)?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn set_drive(&mut self, drive: bool) -> io::Result<()> {
        if !self.settings.rts_direction_control {
            return Ok(());
        }
        self.port()?.write_request_to_send(drive)?;
        Ok(())
    }

    fn reopen(&mut self) -> io::Result<()> {
        debug!("Closing {}", self.settings.path);
        self.port = None;
        thread::sleep(Duration::from_millis(100));
        self.port = Some(self.open_port()?);
        self.set_drive(false)?;
        info!("Reopened probe bus on {}", self.settings.path);
        Ok(())
    }
}
