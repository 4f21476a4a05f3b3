// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Operator-facing status output
//!
//! The control loop renders a [`StatusView`] on every tick and raises a
//! [`Cue`] on notable events. Drawing and tone generation belong to the
//! hardware port; [`LogDisplay`] writes the same information to the log.

use std::time::Duration;

use log::{debug, info, warn};

use crate::flow::FlowState;
use crate::sensor::SensorSample;

/// Progress of the running offload.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub file: Option<String>,
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub files_sent: usize,
    pub files_remaining: usize,
}

/// Everything the screen shows.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusView {
    pub state: FlowState,
    pub remaining: Option<Duration>,
    /// Latest sample received from the acquisition domain.
    pub sample: Option<SensorSample>,
    /// `false` when the sample is missing or older than the staleness limit.
    pub sensor_fresh: bool,
    pub fix_valid: bool,
    pub satellites: u32,
    pub link_connected: bool,
    pub transfer: Option<TransferProgress>,
    pub last_record: Option<u64>,
}

/// Audible cues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// One per countdown second.
    Beep,
    /// A record was written.
    Success,
    /// An analysis ended without a record.
    Alert,
}

pub trait StatusDisplay: Send {
    fn render(&mut self, view: &StatusView);
    fn cue(&mut self, cue: Cue);
}

/// Display that logs screen changes instead of drawing them.
///
/// Only state changes, whole-second countdown steps and transfer file changes
/// are logged, so rendering on every tick stays quiet.
#[derive(Debug, Default)]
pub struct LogDisplay {
    last_state: Option<FlowState>,
    last_second: Option<u64>,
    last_file: Option<String>,
    last_fresh: Option<bool>,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusDisplay for LogDisplay {
    fn render(&mut self, view: &StatusView) {
        if self.last_state != Some(view.state) {
            self.last_state = Some(view.state);
            self.last_second = None;
            info!("[screen] {}", screen_title(view.state));
        }

        let second = view.remaining.map(|r| r.as_secs());
        if second != self.last_second {
            self.last_second = second;
            if let Some(second) = second {
                debug!("[screen] {} {}s", view.state, second);
            }
        }

        if self.last_fresh != Some(view.sensor_fresh) {
            self.last_fresh = Some(view.sensor_fresh);
            if view.sensor_fresh {
                info!("[screen] sensor data available");
            } else {
                warn!("[screen] no fresh sensor data");
            }
        }

        let file = view.transfer.as_ref().and_then(|t| t.file.clone());
        if file != self.last_file {
            if let (Some(name), Some(progress)) = (&file, &view.transfer) {
                info!(
                    "[screen] sending {} ({} done, {} left)",
                    name, progress.files_sent, progress.files_remaining
                );
            }
            self.last_file = file;
        }
    }

    fn cue(&mut self, cue: Cue) {
        match cue {
            Cue::Beep => debug!("[buzzer] beep"),
            Cue::Success => info!("[buzzer] success"),
            Cue::Alert => warn!("[buzzer] alert"),
        }
    }
}

fn screen_title(state: FlowState) -> &'static str {
    match state {
        FlowState::Boot => "AGNI soil sensor",
        FlowState::SelfCheck => "System check",
        FlowState::GpsSearch => "Searching GPS",
        FlowState::InsertPrompt => "Insert the probe in the soil",
        FlowState::Countdown => "Starting analysis",
        FlowState::Analyzing => "Analyzing",
        FlowState::FileCreated => "Data saved",
        FlowState::Transfer => "Transferring data",
    }
}
