// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus RTU frame codec
//!
//! Builds "read holding registers" (function 0x03) requests and decodes the
//! matching responses. Everything here is pure: no I/O, no clocks.
//!
//! ## Wire format
//!
//! Request (8 bytes):
//!
//! | offset | content                      |
//! |--------|------------------------------|
//! | 0      | slave address                |
//! | 1      | function code `0x03`         |
//! | 2..4   | start register, big endian   |
//! | 4..6   | register count, big endian   |
//! | 6..8   | CRC16, little endian         |
//!
//! Response: address, function, byte count `n`, `n` data bytes, CRC16 (LE).
//! An exception response carries `function | 0x80` and a single exception
//! code, for a fixed length of 5 bytes.

use super::BusError;

/// Function code for "read holding registers".
pub const READ_HOLDING_REGISTERS: u8 = 0x03;

/// Bit set on the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Largest frame the receiver will buffer.
pub const MAX_FRAME_LEN: usize = 256;

/// Largest register count a single 0x03 request may ask for.
pub const MAX_REGISTER_COUNT: u16 = 125;

/// Length of an encoded read request.
pub const REQUEST_LEN: usize = 8;

/// Minimum number of bytes before the total response length is known.
const HEADER_LEN: usize = 5;

/// Compute the Modbus CRC16 of `data`.
///
/// Reflected polynomial 0xA001, seed 0xFFFF, bitwise.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the CRC of `frame` to it, low byte first.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check the trailing CRC of a complete frame.
///
/// Returns the `(computed, received)` pair on mismatch.
pub fn verify_crc(frame: &[u8]) -> Result<(), (u16, u16)> {
    if frame.len() < 3 {
        return Err((0, 0));
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    let computed = crc16(body);
    if computed == received {
        Ok(())
    } else {
        Err((computed, received))
    }
}

/// Encode a "read holding registers" request.
pub fn build_read_request(slave: u8, start: u16, count: u16) -> [u8; REQUEST_LEN] {
    let [start_hi, start_lo] = start.to_be_bytes();
    let [count_hi, count_lo] = count.to_be_bytes();
    let mut frame = [
        slave,
        READ_HOLDING_REGISTERS,
        start_hi,
        start_lo,
        count_hi,
        count_lo,
        0,
        0,
    ];
    let [crc_lo, crc_hi] = crc16(&frame[..6]).to_le_bytes();
    frame[6] = crc_lo;
    frame[7] = crc_hi;
    frame
}

/// Incremental response accumulator.
///
/// Bytes are fed as they arrive from the transceiver, in fragments of any
/// size. Once enough of the header is present the parser knows the total
/// frame length and stops accepting input when it is reached. The result is
/// the same whether the frame arrives in one piece or byte by byte.
#[derive(Debug, Default, Clone)]
pub struct ResponseParser {
    buf: Vec<u8>,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(MAX_FRAME_LEN),
        }
    }

    /// Feed received bytes. Returns how many were consumed; anything past the
    /// end of the frame (or past [`MAX_FRAME_LEN`]) is left unconsumed.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let mut consumed = 0;
        for &byte in bytes {
            if self.is_complete() || self.buf.len() >= MAX_FRAME_LEN {
                break;
            }
            self.buf.push(byte);
            consumed += 1;
        }
        consumed
    }

    /// Total frame length, once it can be derived from the header.
    pub fn expected_len(&self) -> Option<usize> {
        if self.buf.len() >= 2 && self.buf[1] & EXCEPTION_FLAG != 0 {
            return Some(HEADER_LEN);
        }
        if self.buf.len() < HEADER_LEN {
            return None;
        }
        Some(3 + usize::from(self.buf[2]) + 2)
    }

    pub fn is_complete(&self) -> bool {
        self.expected_len()
            .is_some_and(|expected| self.buf.len() >= expected)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Raw bytes accumulated so far.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Validate the accumulated frame as the answer to a read of `count`
    /// registers from `slave` and decode its register values.
    pub fn decode(&self, slave: u8, count: u16) -> Result<Vec<u16>, BusError> {
        if !self.is_complete() {
            return Err(BusError::Truncated {
                received: self.buf.len(),
            });
        }
        decode_read_response(&self.buf, slave, count)
    }
}

/// Decode a complete response frame.
///
/// The CRC is checked first; a frame that fails it is rejected as a whole,
/// no partial values are salvaged.
pub fn decode_read_response(frame: &[u8], slave: u8, count: u16) -> Result<Vec<u16>, BusError> {
    if frame.len() < HEADER_LEN {
        return Err(BusError::Truncated {
            received: frame.len(),
        });
    }
    verify_crc(frame)
        .map_err(|(computed, received)| BusError::ChecksumMismatch { computed, received })?;

    if frame[0] != slave {
        return Err(BusError::UnexpectedResponse(format!(
            "address {:#04x} does not match slave {:#04x}",
            frame[0], slave
        )));
    }
    if frame[1] == READ_HOLDING_REGISTERS | EXCEPTION_FLAG {
        return Err(BusError::Exception(frame[2]));
    }
    if frame[1] != READ_HOLDING_REGISTERS {
        return Err(BusError::UnexpectedResponse(format!(
            "function {:#04x} in reply to {:#04x}",
            frame[1], READ_HOLDING_REGISTERS
        )));
    }

    let byte_count = usize::from(frame[2]);
    if byte_count != usize::from(count) * 2 {
        return Err(BusError::UnexpectedResponse(format!(
            "byte count {} for {} registers",
            byte_count, count
        )));
    }

    Ok(frame[3..3 + byte_count]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode a successful response. Used by the simulated probe.
pub fn build_read_response(slave: u8, registers: &[u16]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + registers.len() * 2);
    frame.push(slave);
    frame.push(READ_HOLDING_REGISTERS);
    frame.push((registers.len() * 2) as u8);
    for value in registers {
        frame.extend_from_slice(&value.to_be_bytes());
    }
    append_crc(&mut frame);
    frame
}

/// Encode an exception response.
pub fn build_exception_response(slave: u8, function: u8, code: u8) -> Vec<u8> {
    let mut frame = vec![slave, function | EXCEPTION_FLAG, code];
    append_crc(&mut frame);
    frame
}

/// Decode a read request received on the slave side.
///
/// Returns `(slave, start, count)` when the frame is a CRC-valid 0x03 request.
pub fn parse_read_request(frame: &[u8]) -> Option<(u8, u16, u16)> {
    if frame.len() != REQUEST_LEN || verify_crc(frame).is_err() {
        return None;
    }
    if frame[1] != READ_HOLDING_REGISTERS {
        return None;
    }
    let start = u16::from_be_bytes([frame[2], frame[3]]);
    let count = u16::from_be_bytes([frame[4], frame[5]]);
    Some((frame[0], start, count))
}

/// Render bytes as space separated hex for trace logs.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
