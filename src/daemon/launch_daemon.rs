// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Management
//!
//! Each domain runs as its own task and checks a shared `running` flag to
//! terminate. The only data shared between the acquisition and control
//! domains is the single-slot sample channel; radio callbacks reach the
//! control domain through the bounded event queue.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::acquisition::{
    self, channel, AcquisitionWorker, ProbeControl, SamplePublisher, SampleReceiver,
};
use crate::config::Config;
use crate::controller::{Controller, ControllerSettings, Peripherals};
use crate::display::LogDisplay;
use crate::modbus::SerialTransport;
use crate::radio::{event_queue, OfflineRadio, RadioEvent, RadioEventSender, RadioLink};
use crate::sensor::SensorSample;
use crate::storage::DirectoryRecordStore;
use crate::watchdog::Watchdog;

/// Coordinates the background tasks of the instrument.
///
/// # Fields
///
/// * `tasks` - Handles of the running tasks, awaited by [`Daemon::join`]
/// * `running` - Flag shared with every task to coordinate shutdown
/// * `watchdog` - Liveness registry shared by the domains
/// * `radio_events` - Producer side of the radio event queue, for the link
///   callbacks
/// * `probe` - Control handle of the simulated probe, when one is used
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    watchdog: Option<Arc<Watchdog>>,
    radio_events: Option<RadioEventSender>,
    probe: Option<ProbeControl>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance with no task started.
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            watchdog: None,
            radio_events: None,
            probe: None,
        }
    }

    /// Launch all tasks on a unit without a wireless link.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        self.launch_with_radio(config, Box::new(OfflineRadio)).await
    }

    /// Launch all tasks, sending wireless traffic through `radio`.
    ///
    /// The radio stack reports connection changes and command writes through
    /// [`Daemon::radio_events`].
    pub async fn launch_with_radio(
        &mut self,
        config: &Config,
        radio: Box<dyn RadioLink>,
    ) -> Result<()> {
        let boot = Instant::now();
        let watchdog = Arc::new(Watchdog::new(Duration::from_millis(
            config.watchdog.timeout_ms,
        )));
        self.watchdog = Some(watchdog.clone());

        let (publisher, samples) = channel::<SensorSample>();
        let (events_tx, events_rx) = event_queue(config.transfer.event_queue_capacity);
        self.radio_events = Some(events_tx);

        self.start_acquisition(config, publisher, &watchdog, boot)?;
        self.start_control(config, samples, events_rx, radio, &watchdog)?;
        self.start_watchdog_supervisor(config, watchdog)?;
        self.start_heartbeat()?;

        info!("Soil sensor daemon started with {} tasks", self.tasks.len());
        Ok(())
    }

    /// Producer side of the radio event queue.
    pub fn radio_events(&self) -> Option<RadioEventSender> {
        self.radio_events.clone()
    }

    pub fn watchdog(&self) -> Option<&Watchdog> {
        self.watchdog.as_deref()
    }

    /// Control handle of the simulated probe, `None` on real hardware.
    pub fn simulated_probe(&self) -> Option<&ProbeControl> {
        self.probe.as_ref()
    }

    /// Start the acquisition domain on a blocking thread
    fn start_acquisition(
        &mut self,
        config: &Config,
        publisher: SamplePublisher<SensorSample>,
        watchdog: &Watchdog,
        boot: Instant,
    ) -> Result<()> {
        let interval = Duration::from_millis(config.acquisition.interval_ms);
        let handle = watchdog.register("acquisition");

        if config.sensor.simulated {
            info!("Starting acquisition from the simulated probe");
            let (reader, control) = acquisition::simulated_probe_reader(config, boot);
            self.probe = Some(control);
            self.spawn_worker(AcquisitionWorker::new(reader, publisher, handle, interval));
        } else {
            info!(
                "Starting acquisition on {} at {} baud",
                config.modbus.port, config.modbus.baud_rate
            );
            let reader = acquisition::open_probe_reader(config, boot);
            self.spawn_worker(AcquisitionWorker::new(reader, publisher, handle, interval));
        }
        Ok(())
    }

    fn spawn_worker<T>(&mut self, worker: AcquisitionWorker<T>)
    where
        T: SerialTransport + 'static,
    {
        let running = self.running.clone();
        let task = tokio::task::spawn_blocking(move || {
            worker.run(running);
            Ok(())
        });
        self.tasks.push(task);
    }

    /// Start the control domain on a fixed tick
    fn start_control(
        &mut self,
        config: &Config,
        samples: SampleReceiver<SensorSample>,
        events: mpsc::Receiver<RadioEvent>,
        radio: Box<dyn RadioLink>,
        watchdog: &Watchdog,
    ) -> Result<()> {
        let tick = Duration::from_millis(config.flow.tick_ms.max(1));
        info!(
            "Starting control loop every {:?}, records in {}",
            tick, config.storage.data_dir
        );

        let peripherals = Peripherals {
            radio,
            store: Box::new(
                DirectoryRecordStore::open(&config.storage.data_dir)
                    .with_min_free_bytes(config.storage.min_free_bytes),
            ),
            location: config.location.source(),
            display: Box::new(LogDisplay::new()),
        };
        let mut controller = Controller::new(
            ControllerSettings {
                stale_after: Duration::from_millis(config.acquisition.stale_after_ms),
                status_interval: Duration::from_millis(config.watchdog.status_interval_ms),
                health_interval: Duration::from_millis(config.watchdog.health_interval_ms),
            },
            config.flow.durations(),
            config.transfer.settings(),
            samples,
            events,
            peripherals,
            watchdog.register("control"),
            Instant::now(),
        );

        let running = self.running.clone();
        let task = tokio::spawn(async move {
            let mut interval = time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                controller.tick(Instant::now());
            }
            debug!("Control loop stopped");
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start the task that checks every domain's deadline
    fn start_watchdog_supervisor(&mut self, config: &Config, watchdog: Arc<Watchdog>) -> Result<()> {
        let period = Duration::from_millis(config.watchdog.check_interval_ms.max(1));
        debug!(
            "Starting watchdog supervisor, timeout {:?}",
            watchdog.timeout()
        );

        let running = self.running.clone();
        let task = tokio::spawn(async move {
            let mut interval = time::interval(period);
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                let expired = watchdog.check(Instant::now());
                if !expired.is_empty() {
                    debug!("Hung domains: {}", expired.join(", "));
                }
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start a heartbeat task that logs periodically
    fn start_heartbeat(&mut self) -> Result<()> {
        debug!("Starting heartbeat monitor");

        let running = self.running.clone();
        let task = tokio::spawn(async move {
            let mut beats: u64 = 0;
            while running.load(Ordering::SeqCst) {
                if beats % 60 == 0 {
                    debug!("Daemon heartbeat: running");
                }
                beats += 1;
                time::sleep(Duration::from_secs(1)).await;
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Stop all running tasks
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for all tasks to complete
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match task.await {
                Ok(Err(e)) => error!("Task failed: {}", e),
                Err(e) => error!("Task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        Ok(())
    }
}
