// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Probe to record to wireless offload, driven on a synthetic clock.

use std::fs;
use std::time::{Duration, Instant};

use agni_soil_sensor::acquisition::{
    channel, AcquisitionWorker, ProbeControl, SimulatedSoilProbe, SoilReading,
};
use agni_soil_sensor::controller::{Controller, ControllerSettings, Peripherals};
use agni_soil_sensor::display::LogDisplay;
use agni_soil_sensor::flow::{FlowDurations, FlowState};
use agni_soil_sensor::location::NoFixSource;
use agni_soil_sensor::modbus::{MasterSettings, ModbusMaster};
use agni_soil_sensor::radio::{event_queue, MemoryRadio, MemoryRadioPeer, RadioEventSender};
use agni_soil_sensor::sensor::{FailureRecovery, RecoveryPolicy, RegisterMap, SoilSensorReader};
use agni_soil_sensor::storage::DirectoryRecordStore;
use agni_soil_sensor::transfer::TransferSettings;
use agni_soil_sensor::watchdog::Watchdog;
use tempfile::TempDir;

const TICK: Duration = Duration::from_millis(5);

struct Instrument {
    worker: AcquisitionWorker<SimulatedSoilProbe>,
    probe: ProbeControl,
    controller: Controller,
    events: RadioEventSender,
    peer: MemoryRadioPeer,
    dir: TempDir,
    now: Instant,
}

impl Instrument {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let watchdog = Watchdog::new(Duration::from_secs(30));
        let now = Instant::now();

        let (probe_transport, probe) = SimulatedSoilProbe::new(0x01);
        let reader = SoilSensorReader::new(
            ModbusMaster::new(
                probe_transport,
                MasterSettings {
                    response_timeout: Duration::from_millis(40),
                    turnaround: Duration::from_millis(2),
                },
            ),
            RegisterMap::default(),
            FailureRecovery::new(RecoveryPolicy::default(), now),
        );
        let (publisher, samples) = channel();
        let worker = AcquisitionWorker::new(
            reader,
            publisher,
            watchdog.register("acquisition"),
            Duration::from_secs(5),
        );

        let (events, events_rx) = event_queue(8);
        let (radio, peer) = MemoryRadio::pair();
        let controller = Controller::new(
            ControllerSettings::default(),
            FlowDurations {
                boot: Duration::from_millis(10),
                self_check: Duration::from_millis(10),
                gps_search: Duration::from_millis(20),
                insert_prompt: Duration::from_millis(20),
                countdown: Duration::from_millis(30),
                analyzing: Duration::from_millis(60),
                file_created: Duration::from_millis(20),
            },
            TransferSettings {
                chunk_size: 32,
                chunk_interval: Duration::from_millis(1),
                auto_start: false,
                auto_start_delay: Duration::from_secs(5),
            },
            samples,
            events_rx,
            Peripherals {
                radio: Box::new(radio),
                store: Box::new(DirectoryRecordStore::open(dir.path())),
                location: Box::new(NoFixSource),
                display: Box::new(LogDisplay::new()),
            },
            watchdog.register("control"),
            now,
        );

        Self {
            worker,
            probe,
            controller,
            events,
            peer,
            dir,
            now,
        }
    }

    fn tick(&mut self) {
        self.now += TICK;
        self.controller.tick(self.now);
    }

    fn run_until(&mut self, state: FlowState, limit: usize) {
        for _ in 0..limit {
            self.tick();
            if self.controller.flow().state() == state {
                return;
            }
        }
        panic!(
            "never reached {}, stuck in {}",
            state,
            self.controller.flow().state()
        );
    }

    fn records(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("farmland_"))
            .collect();
        names.sort();
        names
    }
}

#[test]
fn test_alkaline_reading_without_npk_is_recorded_once() {
    let mut unit = Instrument::new();
    unit.probe.set_reading(SoilReading {
        ph: 9.0,
        ..SoilReading::default()
    });
    unit.probe.set_npk_offline(true);

    unit.run_until(FlowState::Analyzing, 200);
    let sample = unit.worker.poll_once(unit.now);
    assert!(sample.basic_valid);
    assert!(!sample.npk_valid);

    unit.run_until(FlowState::FileCreated, 200);
    assert_eq!(unit.records(), vec!["farmland_1.json"]);

    let text = fs::read_to_string(unit.dir.path().join("farmland_1.json")).unwrap();
    let record: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(record["ph_category"], "alkaline");
    assert_eq!(record["sensor_valid"], false);
    assert_eq!(record["parameters"]["nitrogen"], 0);
    assert_eq!(record["location"]["valid"], false);
    assert_eq!(record["timestamp"], "0000-00-00T00:00:00Z");
}

#[test]
fn test_complete_reading_is_recorded_and_offloaded() {
    let mut unit = Instrument::new();

    unit.run_until(FlowState::Analyzing, 200);
    let sample = unit.worker.poll_once(unit.now);
    assert!(sample.is_complete());
    unit.run_until(FlowState::FileCreated, 200);

    let text = fs::read_to_string(unit.dir.path().join("farmland_1.json")).unwrap();
    let record: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(record["sensor_valid"], true);
    assert_eq!(record["ph_category"], "neutral");
    assert_eq!(record["parameters"]["potassium"], 155);

    unit.run_until(FlowState::InsertPrompt, 200);
    unit.peer.set_connected(true);
    assert!(unit.events.connected());
    assert!(unit.events.command_written(b"START_TRANSFER"));
    unit.tick();
    assert_eq!(unit.controller.flow().state(), FlowState::Transfer);

    unit.run_until(FlowState::InsertPrompt, 500);

    let frames: Vec<String> = unit
        .peer
        .data()
        .iter()
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .collect();
    assert_eq!(
        frames.first().map(String::as_str),
        Some(format!("FILE_START:farmland_1.json|SIZE:{}", text.len()).as_str())
    );
    let body: String = frames[1..frames.len() - 2].concat();
    assert_eq!(body, text);
    assert_eq!(frames[frames.len() - 2], "FILE_END:farmland_1.json");
    assert_eq!(frames[frames.len() - 1], "TRANSFER_COMPLETE|1 file transferred");
    assert_eq!(unit.peer.commands(), vec!["TRANSFER_STARTED"]);
}

#[test]
fn test_silent_probe_publishes_nothing() {
    let mut unit = Instrument::new();
    unit.probe.set_offline(true);

    unit.run_until(FlowState::Analyzing, 200);
    let sample = unit.worker.poll_once(unit.now);
    assert!(!sample.basic_valid);
    assert!(unit.probe.requests() >= 1);

    unit.run_until(FlowState::FileCreated, 200);
    assert!(unit.records().is_empty());
    assert_eq!(unit.controller.last_record(), None);
}
