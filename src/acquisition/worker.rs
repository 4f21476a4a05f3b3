// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Acquisition domain worker
//!
//! Runs on its own blocking thread. It owns the probe bus (and therefore the
//! recovery policy) and is the only writer of the sample channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::channel::SamplePublisher;
use crate::modbus::SerialTransport;
use crate::sensor::{SensorSample, SoilSensorReader};
use crate::watchdog::WatchdogHandle;

/// Granularity of the sleep between polls, so shutdown is noticed quickly.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

pub struct AcquisitionWorker<T: SerialTransport> {
    reader: SoilSensorReader<T>,
    publisher: SamplePublisher<SensorSample>,
    watchdog: WatchdogHandle,
    interval: Duration,
}

impl<T: SerialTransport> AcquisitionWorker<T> {
    pub fn new(
        reader: SoilSensorReader<T>,
        publisher: SamplePublisher<SensorSample>,
        watchdog: WatchdogHandle,
        interval: Duration,
    ) -> Self {
        Self {
            reader,
            publisher,
            watchdog,
            interval,
        }
    }

    /// Read the probe once and publish the sample if the basic panel is valid.
    pub fn poll_once(&mut self, now: Instant) -> SensorSample {
        self.watchdog.feed_at(now);
        let sample = self.reader.read(now);
        if sample.basic_valid {
            if self.publisher.publish(sample) {
                debug!("Previous sample was never consumed");
            }
            debug!(
                "Soil sample: moisture {:.1}% temp {:.1}°C pH {:.1} EC {} npk_valid={}",
                sample.moisture, sample.temperature, sample.ph, sample.conductivity, sample.npk_valid
            );
        } else {
            warn!("Soil probe reading failed");
        }
        sample
    }

    /// Poll until `running` is cleared.
    pub fn run(mut self, running: Arc<AtomicBool>) {
        info!("Acquisition worker started, polling every {:?}", self.interval);
        while running.load(Ordering::SeqCst) {
            self.poll_once(Instant::now());

            let wake = Instant::now() + self.interval;
            while running.load(Ordering::SeqCst) {
                self.watchdog.feed();
                let left = wake.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                thread::sleep(left.min(SLEEP_SLICE));
            }
        }
        info!(
            "Acquisition worker stopped after {} bus resets",
            self.reader.recovery().resets()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::channel;
    use crate::acquisition::simulated::SimulatedSoilProbe;
    use crate::modbus::{MasterSettings, ModbusMaster};
    use crate::sensor::{FailureRecovery, RecoveryPolicy, RegisterMap};
    use crate::watchdog::Watchdog;

    fn worker(
        probe: SimulatedSoilProbe,
        watchdog: &Watchdog,
    ) -> (
        AcquisitionWorker<SimulatedSoilProbe>,
        channel::SampleReceiver<SensorSample>,
    ) {
        let (tx, rx) = channel::channel();
        let reader = SoilSensorReader::new(
            ModbusMaster::new(
                probe,
                MasterSettings {
                    response_timeout: Duration::from_millis(30),
                    turnaround: Duration::from_millis(2),
                },
            ),
            RegisterMap::default(),
            FailureRecovery::new(RecoveryPolicy::default(), Instant::now()),
        );
        let handle = watchdog.register("acquisition");
        (
            AcquisitionWorker::new(reader, tx, handle, Duration::from_millis(50)),
            rx,
        )
    }

    #[test]
    fn test_invalid_sample_is_not_published() {
        let watchdog = Watchdog::new(Duration::from_secs(30));
        let (probe, control) = SimulatedSoilProbe::new(1);
        let (mut worker, rx) = worker(probe, &watchdog);

        let good = worker.poll_once(Instant::now());
        assert!(good.basic_valid);

        control.set_offline(true);
        let bad = worker.poll_once(Instant::now());
        assert!(!bad.basic_valid);

        assert_eq!(rx.try_take(), Some(good));
        assert_eq!(rx.try_take(), None);
    }

    #[test]
    fn test_run_stops_on_flag() {
        let watchdog = Watchdog::new(Duration::from_secs(30));
        let (probe, _control) = SimulatedSoilProbe::new(1);
        let (worker, rx) = worker(probe, &watchdog);
        let running = Arc::new(AtomicBool::new(true));

        let flag = running.clone();
        let thread = thread::spawn(move || worker.run(flag));
        thread::sleep(Duration::from_millis(200));
        running.store(false, Ordering::SeqCst);
        thread.join().unwrap();

        assert!(rx.try_take().is_some_and(|s| s.basic_valid));
    }
}
