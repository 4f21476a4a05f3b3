// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Module
//!
//! Starts and supervises the long-running domains of the instrument:
//!
//! * **Acquisition**: blocking probe polling on a dedicated thread
//! * **Control**: the flow, transfer and display loop on a fixed tick
//! * **Watchdog supervisor**: per-domain liveness checks
//! * **Heartbeat**: periodic debug trace
//!
//! ## Usage
//!
//! ```no_run
//! use agni_soil_sensor::{config::Config, daemon::Daemon};
//!
//! async fn run() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!
//!     daemon.shutdown();
//!     daemon.join().await?;
//!     Ok(())
//! }
//! ```

pub mod launch_daemon;

pub use launch_daemon::Daemon;
