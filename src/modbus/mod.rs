// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus RTU master for the soil probe bus
//!
//! The probe sits on a half-duplex RS-485 segment. This module provides the
//! master side of that link, restricted to what the probe needs: function
//! 0x03 (read holding registers) against a single slave.
//!
//! ## Key Components
//!
//! - [`frame`]: pure frame codec (request encoding, CRC16, incremental
//!   response parsing).
//! - [`SerialTransport`]: byte stream plus transceiver direction control.
//!   [`SerialPortTransport`] drives a real adapter through the `serialport`
//!   crate.
//! - [`ModbusMaster`]: one blocking transaction at a time, with the bus
//!   turnaround delays and the response timeout.
//!
//! ## Usage
//!
//! ```no_run
//! use agni_soil_sensor::modbus::{MasterSettings, ModbusMaster, SerialPortTransport, SerialSettings};
//!
//! let transport = SerialPortTransport::open(SerialSettings::default())?;
//! let mut master = ModbusMaster::new(transport, MasterSettings::default());
//! let registers = master.read(0x01, 0x0000, 4)?;
//! println!("moisture raw: {}", registers[0]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod frame;
pub mod master;
pub mod transport;

use thiserror::Error;

pub use master::{BusReset, MasterSettings, ModbusMaster};
pub use transport::{SerialPortTransport, SerialSettings, SerialTransport};

/// Failure of a single bus transaction.
///
/// None of these are fatal: the caller counts them and retries on the next
/// poll.
#[derive(Debug, Error)]
pub enum BusError {
    /// Nothing was received before the response timeout.
    #[error("no response from slave {slave:#04x} within {timeout_ms} ms")]
    Timeout { slave: u8, timeout_ms: u64 },

    /// The response stopped before its announced length.
    #[error("truncated response: {received} bytes received")]
    Truncated { received: usize },

    /// The trailing CRC does not match the frame contents.
    #[error("CRC mismatch: computed {computed:#06x}, received {received:#06x}")]
    ChecksumMismatch { computed: u16, received: u16 },

    /// The slave answered with an exception code.
    #[error("slave exception code {0:#04x}")]
    Exception(u8),

    /// A CRC-valid frame that does not answer the request.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The request itself cannot be encoded.
    #[error("invalid register count {0}")]
    InvalidCount(u16),

    #[error("serial transport error: {0}")]
    Transport(#[from] std::io::Error),
}
