// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Half-duplex Modbus RTU transaction
//!
//! One call to [`ModbusMaster::read`] is one complete transaction:
//!
//! 1. drop stale input,
//! 2. switch the transceiver to drive and let the line settle,
//! 3. transmit the request and wait for the transmitter to drain,
//! 4. switch back to receive and let the line settle again,
//! 5. collect the response until it is complete or the timeout expires,
//! 6. validate and decode it.
//!
//! The call blocks for the whole sequence. It belongs on the acquisition
//! worker, never on the control loop.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use super::frame::{self, ResponseParser, MAX_FRAME_LEN, MAX_REGISTER_COUNT};
use super::{BusError, SerialTransport};

/// Shortest turnaround the transceiver tolerates.
pub const MIN_TURNAROUND: Duration = Duration::from_millis(2);

/// Upper bound on a single transport read, so the deadline is re-checked
/// regularly.
const READ_SLICE: Duration = Duration::from_millis(20);

/// Timing of a transaction.
#[derive(Debug, Clone, Copy)]
pub struct MasterSettings {
    /// How long to wait for a response after the request has been sent.
    pub response_timeout: Duration,
    /// Settle delay after each direction change. Never below
    /// [`MIN_TURNAROUND`].
    pub turnaround: Duration,
}

impl Default for MasterSettings {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(800),
            turnaround: Duration::from_millis(10),
        }
    }
}

/// Anything that can be brought back to a known state by closing and
/// reopening the bus.
pub trait BusReset {
    fn reset_bus(&mut self) -> Result<(), BusError>;
}

/// Modbus RTU master over a [`SerialTransport`].
pub struct ModbusMaster<T: SerialTransport> {
    transport: T,
    settings: MasterSettings,
}

impl<T: SerialTransport> ModbusMaster<T> {
    pub fn new(transport: T, mut settings: MasterSettings) -> Self {
        if settings.turnaround < MIN_TURNAROUND {
            warn!(
                "Turnaround of {:?} is below the transceiver minimum, using {:?}",
                settings.turnaround, MIN_TURNAROUND
            );
            settings.turnaround = MIN_TURNAROUND;
        }
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &MasterSettings {
        &self.settings
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Read `count` holding registers starting at `start` from `slave`.
    pub fn read(&mut self, slave: u8, start: u16, count: u16) -> Result<Vec<u16>, BusError> {
        if count == 0 || count > MAX_REGISTER_COUNT {
            return Err(BusError::InvalidCount(count));
        }

        let request = frame::build_read_request(slave, start, count);
        trace!("TX {}", frame::hex_dump(&request));

        self.transport.clear_input()?;
        self.send(&request)?;

        let parser = self.receive()?;
        trace!("RX {}", frame::hex_dump(parser.bytes()));

        if parser.is_empty() {
            return Err(BusError::Timeout {
                slave,
                timeout_ms: self.settings.response_timeout.as_millis() as u64,
            });
        }

        let registers = parser.decode(slave, count)?;
        debug!(
            "Read {} registers at {:#06x} from slave {:#04x}",
            count, start, slave
        );
        Ok(registers)
    }

    fn send(&mut self, request: &[u8]) -> Result<(), BusError> {
        self.transport.set_drive(true)?;
        thread::sleep(self.settings.turnaround);

        let sent = self
            .transport
            .write_all(request)
            .and_then(|_| self.transport.flush());

        // Always hand the line back, even if the write failed.
        let released = self.transport.set_drive(false);
        thread::sleep(self.settings.turnaround);

        sent?;
        released?;
        Ok(())
    }

    fn receive(&mut self) -> Result<ResponseParser, BusError> {
        let mut parser = ResponseParser::new();
        let mut chunk = [0u8; MAX_FRAME_LEN];
        let deadline = Instant::now() + self.settings.response_timeout;

        while !parser.is_complete() && parser.len() < MAX_FRAME_LEN {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let n = self.transport.read(&mut chunk, remaining.min(READ_SLICE))?;
            if n > 0 {
                parser.push(&chunk[..n]);
            }
        }
        Ok(parser)
    }
}

impl<T: SerialTransport> BusReset for ModbusMaster<T> {
    /// Close and reopen the serial device, leaving the transceiver in
    /// receive mode.
    fn reset_bus(&mut self) -> Result<(), BusError> {
        self.transport.reopen()?;
        self.transport.set_drive(false)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::frame::{build_exception_response, build_read_response};
    use std::collections::VecDeque;
    use std::io;

    /// Scripted transport: answers each write with the next canned reply.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: VecDeque<Vec<u8>>,
        pending: VecDeque<u8>,
        written: Vec<Vec<u8>>,
        drive_log: Vec<bool>,
        fragment: usize,
        reopened: usize,
    }

    impl SerialTransport for ScriptedTransport {
        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            assert_eq!(self.drive_log.last(), Some(&true), "write while receiving");
            self.written.push(bytes.to_vec());
            if let Some(reply) = self.replies.pop_front() {
                self.pending.extend(reply);
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
            let limit = if self.fragment == 0 {
                buf.len()
            } else {
                self.fragment.min(buf.len())
            };
            let mut n = 0;
            while n < limit {
                match self.pending.pop_front() {
                    Some(byte) => {
                        buf[n] = byte;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.pending.clear();
            Ok(())
        }

        fn set_drive(&mut self, drive: bool) -> io::Result<()> {
            self.drive_log.push(drive);
            Ok(())
        }

        fn reopen(&mut self) -> io::Result<()> {
            self.reopened += 1;
            Ok(())
        }
    }

    fn fast_settings() -> MasterSettings {
        MasterSettings {
            response_timeout: Duration::from_millis(50),
            turnaround: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_read_sends_request_and_decodes() {
        let mut transport = ScriptedTransport::default();
        transport
            .replies
            .push_back(build_read_response(1, &[452, 215, 1200, 65]));
        let mut master = ModbusMaster::new(transport, fast_settings());

        let registers = master.read(1, 0x0000, 4).unwrap();
        assert_eq!(registers, vec![452, 215, 1200, 65]);

        let transport = master.transport();
        assert_eq!(
            transport.written,
            vec![frame::build_read_request(1, 0x0000, 4).to_vec()]
        );
        assert_eq!(transport.drive_log, vec![true, false]);
    }

    #[test]
    fn test_fragmented_and_whole_delivery_agree() {
        let reply = build_read_response(1, &[30, 40, 50]);

        let mut whole = ScriptedTransport::default();
        whole.replies.push_back(reply.clone());
        let mut byte_by_byte = ScriptedTransport {
            fragment: 1,
            ..Default::default()
        };
        byte_by_byte.replies.push_back(reply);

        let a = ModbusMaster::new(whole, fast_settings()).read(1, 6, 3).unwrap();
        let b = ModbusMaster::new(byte_by_byte, fast_settings())
            .read(1, 6, 3)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_silence_is_timeout() {
        let mut master = ModbusMaster::new(ScriptedTransport::default(), fast_settings());
        assert!(matches!(
            master.read(1, 0, 4),
            Err(BusError::Timeout { slave: 1, .. })
        ));
    }

    #[test]
    fn test_exception_reply() {
        let mut transport = ScriptedTransport::default();
        transport
            .replies
            .push_back(build_exception_response(1, 0x03, 0x02));
        let mut master = ModbusMaster::new(transport, fast_settings());
        assert!(matches!(master.read(1, 0, 4), Err(BusError::Exception(0x02))));
    }

    #[test]
    fn test_turnaround_floor() {
        let master = ModbusMaster::new(
            ScriptedTransport::default(),
            MasterSettings {
                response_timeout: Duration::from_millis(10),
                turnaround: Duration::from_millis(0),
            },
        );
        assert_eq!(master.settings().turnaround, MIN_TURNAROUND);
    }

    #[test]
    fn test_invalid_count() {
        let mut master = ModbusMaster::new(ScriptedTransport::default(), fast_settings());
        assert!(matches!(master.read(1, 0, 0), Err(BusError::InvalidCount(0))));
        assert!(matches!(
            master.read(1, 0, 126),
            Err(BusError::InvalidCount(126))
        ));
    }

    #[test]
    fn test_reset_reopens_and_releases_line() {
        let mut master = ModbusMaster::new(ScriptedTransport::default(), fast_settings());
        master.reset_bus().unwrap();
        assert_eq!(master.transport().reopened, 1);
        assert_eq!(master.transport().drive_log, vec![false]);
    }
}
