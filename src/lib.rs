// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! AGNI soil sensor library
//!
//! Firmware core of a portable soil analyzer: a Modbus RTU master polling an
//! RS-485 soil probe, the timed measurement flow, JSON record persistence and
//! a chunked record offload over a short-range wireless link.
//!
//! Two domains run side by side. The acquisition domain owns the probe bus
//! and publishes samples into a single-slot channel; the control domain owns
//! everything else and never blocks.

pub mod acquisition;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod display;
pub mod flow;
pub mod location;
pub mod modbus;
pub mod radio;
pub mod sensor;
pub mod storage;
pub mod transfer;
pub mod watchdog;
