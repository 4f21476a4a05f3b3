// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Control domain
//!
//! [`Controller`] owns everything the control loop touches: the operating
//! flow, the offload protocol, the radio event queue and the collaborators
//! behind their traits. The daemon calls [`Controller::tick`] on a fixed
//! period; a tick never blocks.
//!
//! Per tick:
//!
//! 1. feed the watchdog and refresh the location snapshot
//! 2. take the latest sample from the acquisition channel, if any
//! 3. drain radio events (connect, disconnect, commands)
//! 4. start the automatic offload or a latched transfer request when the
//!    flow allows it
//! 5. advance the transfer, or the timed flow when no transfer runs
//! 6. periodic status and storage health logs, then render the screen

use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::acquisition::SampleReceiver;
use crate::display::{Cue, StatusDisplay, StatusView, TransferProgress};
use crate::flow::{FlowDurations, FlowState, FlowStateMachine};
use crate::location::{LocationFix, LocationSource};
use crate::radio::{ack, RadioCommand, RadioEvent, RadioLink};
use crate::sensor::SensorSample;
use crate::storage::{LogRecord, RecordStore, StorageError};
use crate::transfer::{TransferError, TransferProtocol, TransferSettings, TransferStep};
use crate::watchdog::WatchdogHandle;

#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    /// A sample older than this is not written at the end of an analysis.
    pub stale_after: Duration,
    pub status_interval: Duration,
    pub health_interval: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(15),
            status_interval: Duration::from_secs(10),
            health_interval: Duration::from_secs(30),
        }
    }
}

/// Hardware collaborators of the control domain.
pub struct Peripherals {
    pub radio: Box<dyn RadioLink>,
    pub store: Box<dyn RecordStore>,
    pub location: Box<dyn LocationSource>,
    pub display: Box<dyn StatusDisplay>,
}

pub struct Controller {
    settings: ControllerSettings,
    flow: FlowStateMachine,
    transfer: TransferProtocol,
    samples: SampleReceiver<SensorSample>,
    latest: Option<(SensorSample, Instant)>,
    events: mpsc::Receiver<RadioEvent>,
    peripherals: Peripherals,
    watchdog: WatchdogHandle,
    fix: LocationFix,
    transfer_requested: bool,
    last_record: Option<u64>,
    last_beep: Option<u64>,
    last_status: Instant,
    last_health: Instant,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: ControllerSettings,
        durations: FlowDurations,
        transfer: TransferSettings,
        samples: SampleReceiver<SensorSample>,
        events: mpsc::Receiver<RadioEvent>,
        peripherals: Peripherals,
        watchdog: WatchdogHandle,
        now: Instant,
    ) -> Self {
        Self {
            settings,
            flow: FlowStateMachine::new(durations, now),
            transfer: TransferProtocol::new(transfer),
            samples,
            latest: None,
            events,
            peripherals,
            watchdog,
            fix: LocationFix::none(),
            transfer_requested: false,
            last_record: None,
            last_beep: None,
            last_status: now,
            last_health: now,
        }
    }

    pub fn flow(&self) -> &FlowStateMachine {
        &self.flow
    }

    pub fn transfer(&self) -> &TransferProtocol {
        &self.transfer
    }

    pub fn latest_sample(&self) -> Option<&SensorSample> {
        self.latest.as_ref().map(|(sample, _)| sample)
    }

    /// Id of the last record written by this controller.
    pub fn last_record(&self) -> Option<u64> {
        self.last_record
    }

    /// A transfer request is waiting for a preemptible state.
    pub fn transfer_requested(&self) -> bool {
        self.transfer_requested
    }

    /// One pass of the control loop.
    pub fn tick(&mut self, now: Instant) {
        self.watchdog.feed_at(now);
        self.fix = self.peripherals.location.snapshot();

        if let Some(sample) = self.samples.try_take() {
            debug!("New sample: {:?}", sample);
            self.latest = Some((sample, now));
        }

        // A transfer started during this tick sends its first frame on the
        // next one.
        let transferring = self.flow.state() == FlowState::Transfer;

        loop {
            match self.events.try_recv() {
                Ok(event) => self.handle_event(event, now),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if self.transfer.take_auto_start(now) {
            info!("Automatic transfer due");
            self.request_transfer(now);
        }
        if self.transfer_requested && self.flow.state().can_preempt() {
            self.begin_transfer(now);
        }

        if transferring {
            self.advance_transfer(now);
        } else if let Some(next) = self.flow.due(now, self.fix.valid) {
            self.advance_flow(next, now);
        }

        self.countdown_beep(now);
        self.periodic_logs(now);
        let view = self.status_view(now);
        self.peripherals.display.render(&view);
    }

    fn handle_event(&mut self, event: RadioEvent, now: Instant) {
        match event {
            RadioEvent::Connected => self.transfer.on_connect(now),
            RadioEvent::Disconnected => {
                self.transfer_requested = false;
                if self.transfer.on_disconnect() || self.flow.state() == FlowState::Transfer {
                    self.leave_transfer(now);
                }
            }
            RadioEvent::Command(RadioCommand::StartTransfer) => self.request_transfer(now),
            RadioEvent::Command(RadioCommand::FormatStorage) => self.format_storage(now),
            RadioEvent::Command(RadioCommand::ResetSystem) => self.reset_system(now),
        }
    }

    fn request_transfer(&mut self, now: Instant) {
        if self.transfer.is_active() {
            warn!("Transfer already in progress, request ignored");
            self.acknowledge(ack::TRANSFER_BUSY);
            return;
        }
        if !self.peripherals.radio.is_connected() {
            warn!("Transfer requested without a connected client");
            return;
        }
        if self.flow.state().can_preempt() {
            self.begin_transfer(now);
        } else if !self.transfer_requested {
            info!("Transfer request held until {} ends", self.flow.state());
            self.transfer_requested = true;
        }
    }

    fn begin_transfer(&mut self, now: Instant) {
        self.transfer_requested = false;
        let started = self.transfer.start(
            now,
            self.peripherals.radio.as_ref(),
            self.peripherals.store.as_ref(),
        );
        match started {
            Ok(_) => {
                if let Err(e) = self.flow.transition(FlowState::Transfer, now) {
                    warn!("{}", e);
                    self.transfer.abort("flow refused the transfer");
                    return;
                }
                self.acknowledge(ack::TRANSFER_STARTED);
            }
            Err(TransferError::Busy) => self.acknowledge(ack::TRANSFER_BUSY),
            Err(e) => warn!("Cannot start transfer: {}", e),
        }
    }

    fn advance_transfer(&mut self, now: Instant) {
        let step = self.transfer.poll(
            now,
            self.peripherals.radio.as_mut(),
            self.peripherals.store.as_ref(),
        );
        match step {
            TransferStep::Completed { .. } | TransferStep::Cancelled | TransferStep::Idle => {
                self.leave_transfer(now)
            }
            _ => {}
        }
    }

    fn leave_transfer(&mut self, now: Instant) {
        if self.flow.state() == FlowState::Transfer {
            if let Err(e) = self.flow.transition(FlowState::InsertPrompt, now) {
                warn!("{}", e);
            }
        }
    }

    fn advance_flow(&mut self, next: FlowState, now: Instant) {
        if self.flow.state() == FlowState::Analyzing && next == FlowState::FileCreated {
            self.record_analysis(now);
        }
        if let Err(e) = self.flow.transition(next, now) {
            warn!("{}", e);
        }
    }

    /// Persist the analysis result, if there is a usable sample.
    fn record_analysis(&mut self, now: Instant) {
        let sample = match self.latest {
            Some((sample, at))
                if sample.basic_valid
                    && now.saturating_duration_since(at) <= self.settings.stale_after =>
            {
                sample
            }
            _ => {
                warn!("No fresh sensor sample at the end of the analysis, nothing recorded");
                self.peripherals.display.cue(Cue::Alert);
                return;
            }
        };

        if let Err(e) = self.storage_ready() {
            error!("Storage not ready, analysis not recorded: {}", e);
            self.peripherals.display.cue(Cue::Alert);
            return;
        }

        let id = self.peripherals.store.next_id();
        let record = LogRecord::new(id, &sample, &self.fix);
        match self.peripherals.store.write(&record) {
            Ok(entry) => {
                info!(
                    "Created {} (pH {:.1}, {:?}, sensor valid: {})",
                    entry.name, sample.ph, record.ph_category, record.sensor_valid
                );
                self.last_record = Some(id);
                self.peripherals.display.cue(Cue::Success);
            }
            Err(e) => {
                error!("Failed to persist record {}: {}", id, e);
                self.peripherals.display.cue(Cue::Alert);
            }
        }
    }

    fn storage_ready(&mut self) -> Result<(), StorageError> {
        self.peripherals.store.refresh()?;
        self.peripherals.store.check_health()?;
        Ok(())
    }

    fn format_storage(&mut self, now: Instant) {
        self.transfer_requested = false;
        if self.transfer.abort("storage format") {
            self.leave_transfer(now);
        }
        match self.peripherals.store.wipe() {
            Ok(removed) => {
                info!("Storage formatted, {} entries removed", removed);
                self.last_record = None;
                self.acknowledge(ack::SD_FORMATTED);
            }
            Err(e) => {
                error!("Storage format failed: {}", e);
                self.acknowledge(ack::FORMAT_FAILED);
            }
        }
    }

    fn reset_system(&mut self, now: Instant) {
        self.transfer_requested = false;
        self.transfer.abort("system reset");
        if self.flow.reset(now) {
            info!("System reset, back to the insert prompt");
        }
        self.acknowledge(ack::SYSTEM_RESET);
    }

    fn acknowledge(&mut self, text: &str) {
        if let Err(e) = self.peripherals.radio.notify_command(text.as_bytes()) {
            debug!("Acknowledgement {} not sent: {}", text, e);
        }
    }

    fn countdown_beep(&mut self, now: Instant) {
        if self.flow.state() != FlowState::Countdown {
            self.last_beep = None;
            return;
        }
        let second = self.flow.remaining(now).map(|r| r.as_secs());
        if second.is_some() && second != self.last_beep {
            self.last_beep = second;
            self.peripherals.display.cue(Cue::Beep);
        }
    }

    fn sensor_fresh(&self, now: Instant) -> bool {
        self.latest.as_ref().is_some_and(|(sample, at)| {
            sample.basic_valid && now.saturating_duration_since(*at) <= self.settings.stale_after
        })
    }

    fn periodic_logs(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_status) >= self.settings.status_interval {
            self.last_status = now;
            info!(
                "Status: state={} fix={} satellites={} sensor_fresh={} link={} overwritten_samples={}",
                self.flow.state(),
                self.fix.valid,
                self.fix.satellites,
                self.sensor_fresh(now),
                self.peripherals.radio.is_connected(),
                self.samples.overwritten()
            );
        }
        if now.saturating_duration_since(self.last_health) >= self.settings.health_interval {
            self.last_health = now;
            match self.peripherals.store.check_health() {
                Ok(health) => debug!(
                    "Storage healthy: {} records, {} bytes, {:?} bytes free",
                    health.records, health.bytes, health.available
                ),
                Err(e) => error!("Storage health check failed: {}", e),
            }
        }
    }

    fn status_view(&self, now: Instant) -> StatusView {
        StatusView {
            state: self.flow.state(),
            remaining: self.flow.remaining(now),
            sample: self.latest.map(|(sample, _)| sample),
            sensor_fresh: self.sensor_fresh(now),
            fix_valid: self.fix.valid,
            satellites: self.fix.satellites,
            link_connected: self.peripherals.radio.is_connected(),
            transfer: self.transfer.session().map(|session| TransferProgress {
                file: session.current_file_name().map(str::to_string),
                bytes_sent: session.bytes_sent().unwrap_or(0),
                total_bytes: session.total_bytes().unwrap_or(0),
                files_sent: session.files_sent(),
                files_remaining: session.files_remaining(),
            }),
            last_record: self.last_record,
        }
    }
}
