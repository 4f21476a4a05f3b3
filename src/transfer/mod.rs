// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Chunked record offload over the wireless link
//!
//! ## Protocol
//!
//! For each record, on the data channel:
//!
//! 1. `FILE_START:<name>|SIZE:<bytes>`
//! 2. the file content in chunks of at most `chunk_size` bytes, one per
//!    pacing interval
//! 3. `FILE_END:<name>`
//!
//! and once all records are sent, `TRANSFER_COMPLETE|<summary>`.
//!
//! ## Session rules
//!
//! - At most one session exists. A request while one is pending or in
//!   progress is refused and logged, not queued.
//! - Every step first checks that the link is still connected. A lost link
//!   drops the session on the spot: no `FILE_END`, no `TRANSFER_COMPLETE`.
//! - Once per connection, a session starts on its own after the link has
//!   been up for `auto_start_delay`.
//!
//! [`TransferProtocol::poll`] is non-blocking and emits at most one frame per
//! call, so the control loop keeps its cadence during an offload.

pub mod framing;
pub mod session;

use std::time::{Duration, Instant};

use log::{info, warn};
use thiserror::Error;

use crate::radio::{LinkError, RadioLink};
use crate::storage::{RecordStore, StorageError};
pub use session::{TransferSession, TransferStep};

#[derive(Debug, Clone, Copy)]
pub struct TransferSettings {
    /// Largest chunk put in one notification.
    pub chunk_size: usize,
    /// Minimum spacing between two frames.
    pub chunk_interval: Duration,
    pub auto_start: bool,
    /// Link uptime before the automatic offload starts.
    pub auto_start_delay: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: 256,
            chunk_interval: Duration::from_millis(5),
            auto_start: true,
            auto_start_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Idle,
    /// Between files, next step opens a file or completes.
    Pending,
    InProgress,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("a transfer is already pending or in progress")]
    Busy,
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("cannot enumerate records: {0}")]
    Storage(#[from] StorageError),
}

/// Offload driver, owned by the control domain.
pub struct TransferProtocol {
    settings: TransferSettings,
    session: Option<TransferSession>,
    connected_at: Option<Instant>,
    auto_fired: bool,
}

impl TransferProtocol {
    pub fn new(settings: TransferSettings) -> Self {
        Self {
            settings,
            session: None,
            connected_at: None,
            auto_fired: false,
        }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    pub fn session(&self) -> Option<&TransferSession> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn phase(&self) -> TransferPhase {
        match &self.session {
            None => TransferPhase::Idle,
            Some(session) if session.in_progress() => TransferPhase::InProgress,
            Some(_) => TransferPhase::Pending,
        }
    }

    pub fn on_connect(&mut self, now: Instant) {
        info!("Wireless client connected");
        self.connected_at = Some(now);
        self.auto_fired = false;
    }

    /// Forget the connection and drop any session. Returns whether a session
    /// was cancelled.
    pub fn on_disconnect(&mut self) -> bool {
        info!("Wireless client disconnected");
        self.connected_at = None;
        self.auto_fired = false;
        self.abort("link lost")
    }

    /// Drop the current session without closing frames.
    pub fn abort(&mut self, reason: &str) -> bool {
        match self.session.take() {
            Some(session) => {
                warn!(
                    "Transfer cancelled ({}) after {} files",
                    reason,
                    session.files_sent()
                );
                true
            }
            None => false,
        }
    }

    /// True once per connection, when the automatic offload is due.
    pub fn take_auto_start(&mut self, now: Instant) -> bool {
        if !self.settings.auto_start || self.auto_fired || self.session.is_some() {
            return false;
        }
        match self.connected_at {
            Some(at) if now.saturating_duration_since(at) >= self.settings.auto_start_delay => {
                self.auto_fired = true;
                true
            }
            _ => false,
        }
    }

    /// Open a session over the records currently in `store`.
    ///
    /// Returns the number of records queued.
    pub fn start(
        &mut self,
        now: Instant,
        radio: &dyn RadioLink,
        store: &dyn RecordStore,
    ) -> Result<usize, TransferError> {
        if self.session.is_some() {
            warn!("Transfer already in progress, request ignored");
            return Err(TransferError::Busy);
        }
        if !radio.is_connected() {
            return Err(LinkError::Disconnected.into());
        }
        let listing = store.list()?;
        let files = listing.len();
        info!("Starting record transfer, {} files", files);
        self.session = Some(TransferSession::new(listing, now));
        // An explicit start also uses up this connection's automatic one.
        self.auto_fired = true;
        Ok(files)
    }

    /// Advance the session by at most one frame.
    pub fn poll(
        &mut self,
        now: Instant,
        radio: &mut dyn RadioLink,
        store: &dyn RecordStore,
    ) -> TransferStep {
        let chunk_size = self.settings.chunk_size.max(1);
        let interval = self.settings.chunk_interval;
        let Some(session) = self.session.as_mut() else {
            return TransferStep::Idle;
        };

        if !radio.is_connected() {
            self.abort("link lost");
            return TransferStep::Cancelled;
        }
        if let Some(last) = session.last_emit {
            if now.saturating_duration_since(last) < interval {
                return TransferStep::Paced;
            }
        }

        match session.step(radio, store, chunk_size) {
            Ok(step) => {
                session.last_emit = Some(now);
                if matches!(step, TransferStep::Completed { .. }) {
                    self.session = None;
                }
                step
            }
            Err(e) => {
                self.abort(&e.to_string());
                TransferStep::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::MemoryRadio;
    use crate::storage::{LogRecord, RecordEntry, StoreHealth};
    use std::collections::BTreeMap;
    use std::io::{Cursor, Read};

    /// Store whose files can lie about their size.
    #[derive(Default)]
    struct FakeStore {
        files: BTreeMap<String, (u64, Vec<u8>)>,
    }

    impl FakeStore {
        fn with(files: &[(&str, &str)]) -> Self {
            let mut store = Self::default();
            for (name, content) in files {
                store
                    .files
                    .insert(name.to_string(), (content.len() as u64, content.as_bytes().to_vec()));
            }
            store
        }
    }

    impl RecordStore for FakeStore {
        fn next_id(&self) -> u64 {
            1
        }
        fn write(&mut self, _record: &LogRecord) -> Result<RecordEntry, StorageError> {
            unimplemented!()
        }
        fn list(&self) -> Result<Vec<RecordEntry>, StorageError> {
            Ok(self
                .files
                .iter()
                .map(|(name, (size, _))| RecordEntry {
                    name: name.clone(),
                    size: *size,
                })
                .collect())
        }
        fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, StorageError> {
            self.files
                .get(name)
                .map(|(_, content)| Box::new(Cursor::new(content.clone())) as Box<dyn Read + Send>)
                .ok_or_else(|| StorageError::NotFound(name.to_string()))
        }
        fn wipe(&mut self) -> Result<usize, StorageError> {
            unimplemented!()
        }
        fn check_health(&self) -> Result<StoreHealth, StorageError> {
            Ok(StoreHealth::default())
        }
    }

    fn settings(chunk_size: usize) -> TransferSettings {
        TransferSettings {
            chunk_size,
            chunk_interval: Duration::from_millis(5),
            auto_start: true,
            auto_start_delay: Duration::from_secs(5),
        }
    }

    /// Poll until the session ends, advancing the clock past the pacing.
    fn run_to_end(
        protocol: &mut TransferProtocol,
        radio: &mut MemoryRadio,
        store: &FakeStore,
        mut now: Instant,
    ) -> Vec<TransferStep> {
        let mut steps = Vec::new();
        for _ in 0..1000 {
            now += Duration::from_millis(5);
            let step = protocol.poll(now, radio, store);
            let done = matches!(
                step,
                TransferStep::Completed { .. } | TransferStep::Cancelled | TransferStep::Idle
            );
            steps.push(step);
            if done {
                break;
            }
        }
        steps
    }

    #[test]
    fn test_full_framing_sequence() {
        let store = FakeStore::with(&[("farmland_1.json", "abcdefghij"), ("farmland_2.json", "xyz")]);
        let (mut radio, peer) = MemoryRadio::pair();
        peer.set_connected(true);
        let mut protocol = TransferProtocol::new(settings(4));
        let now = Instant::now();

        assert_eq!(protocol.start(now, &radio, &store).unwrap(), 2);
        let steps = run_to_end(&mut protocol, &mut radio, &store, now);
        assert_eq!(steps.last(), Some(&TransferStep::Completed { files: 2 }));
        assert!(!protocol.is_active());

        let frames: Vec<String> = peer
            .data()
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect();
        assert_eq!(
            frames,
            vec![
                "FILE_START:farmland_1.json|SIZE:10",
                "abcd",
                "efgh",
                "ij",
                "FILE_END:farmland_1.json",
                "FILE_START:farmland_2.json|SIZE:3",
                "xyz",
                "FILE_END:farmland_2.json",
                "TRANSFER_COMPLETE|2 files transferred",
            ]
        );
    }

    #[test]
    fn test_second_request_is_refused() {
        let store = FakeStore::with(&[("farmland_1.json", "0123456789")]);
        let (mut radio, peer) = MemoryRadio::pair();
        peer.set_connected(true);
        let mut protocol = TransferProtocol::new(settings(4));
        let now = Instant::now();

        protocol.start(now, &radio, &store).unwrap();
        assert_eq!(protocol.phase(), TransferPhase::Pending);
        assert!(matches!(
            protocol.start(now, &radio, &store),
            Err(TransferError::Busy)
        ));

        protocol.poll(now, &mut radio, &store);
        assert_eq!(protocol.phase(), TransferPhase::InProgress);
        assert!(matches!(
            protocol.start(now, &radio, &store),
            Err(TransferError::Busy)
        ));

        let steps = run_to_end(&mut protocol, &mut radio, &store, now);
        assert_eq!(steps.last(), Some(&TransferStep::Completed { files: 1 }));
        let starts = peer
            .data()
            .iter()
            .filter(|f| f.starts_with(b"FILE_START:"))
            .count();
        assert_eq!(starts, 1);
    }

    #[test]
    fn test_bytes_sent_capped_at_announced_size() {
        let mut store = FakeStore::default();
        // Announce 6 bytes, but the file holds 10.
        store
            .files
            .insert("farmland_1.json".into(), (6, b"0123456789".to_vec()));
        let (mut radio, peer) = MemoryRadio::pair();
        peer.set_connected(true);
        let mut protocol = TransferProtocol::new(settings(4));
        let mut now = Instant::now();
        protocol.start(now, &radio, &store).unwrap();

        let mut max_sent = 0;
        loop {
            now += Duration::from_millis(5);
            let step = protocol.poll(now, &mut radio, &store);
            if let Some(session) = protocol.session() {
                if let (Some(sent), Some(total)) = (session.bytes_sent(), session.total_bytes()) {
                    assert!(sent <= total);
                    max_sent = max_sent.max(sent);
                }
            }
            if matches!(step, TransferStep::Completed { .. }) {
                break;
            }
        }
        assert_eq!(max_sent, 6);
        let data = peer.data();
        assert_eq!(data[1], b"0123".to_vec());
        assert_eq!(data[2], b"45".to_vec());
        assert_eq!(data[3], b"FILE_END:farmland_1.json".to_vec());
    }

    #[test]
    fn test_short_file_is_closed_early() {
        let mut store = FakeStore::default();
        store
            .files
            .insert("farmland_1.json".into(), (8, b"abc".to_vec()));
        let (mut radio, peer) = MemoryRadio::pair();
        peer.set_connected(true);
        let mut protocol = TransferProtocol::new(settings(4));
        let now = Instant::now();
        protocol.start(now, &radio, &store).unwrap();

        let steps = run_to_end(&mut protocol, &mut radio, &store, now);
        assert!(steps.contains(&TransferStep::FileEnded("farmland_1.json".into())));
        assert_eq!(steps.last(), Some(&TransferStep::Completed { files: 1 }));
    }

    #[test]
    fn test_disconnect_cancels_without_closing_frames() {
        let store = FakeStore::with(&[("farmland_1.json", "0123456789")]);
        let (mut radio, peer) = MemoryRadio::pair();
        peer.set_connected(true);
        let mut protocol = TransferProtocol::new(settings(4));
        let mut now = Instant::now();
        protocol.start(now, &radio, &store).unwrap();

        now += Duration::from_millis(5);
        protocol.poll(now, &mut radio, &store);
        now += Duration::from_millis(5);
        protocol.poll(now, &mut radio, &store);

        peer.set_connected(false);
        now += Duration::from_millis(5);
        assert_eq!(protocol.poll(now, &mut radio, &store), TransferStep::Cancelled);
        assert!(!protocol.is_active());

        let data = peer.data();
        assert_eq!(data.len(), 2);
        assert!(!data.iter().any(|f| f.starts_with(b"FILE_END:")));
        assert!(!data.iter().any(|f| f.starts_with(b"TRANSFER_COMPLETE|")));
    }

    #[test]
    fn test_pacing_between_frames() {
        let store = FakeStore::with(&[("farmland_1.json", "0123456789")]);
        let (mut radio, peer) = MemoryRadio::pair();
        peer.set_connected(true);
        let mut protocol = TransferProtocol::new(settings(4));
        let now = Instant::now();
        protocol.start(now, &radio, &store).unwrap();

        assert!(matches!(
            protocol.poll(now, &mut radio, &store),
            TransferStep::Announced(_)
        ));
        assert_eq!(
            protocol.poll(now + Duration::from_millis(2), &mut radio, &store),
            TransferStep::Paced
        );
        assert_eq!(
            protocol.poll(now + Duration::from_millis(5), &mut radio, &store),
            TransferStep::Chunk(4)
        );
    }

    #[test]
    fn test_auto_start_once_per_connection() {
        let mut protocol = TransferProtocol::new(settings(4));
        let t0 = Instant::now();
        assert!(!protocol.take_auto_start(t0));

        protocol.on_connect(t0);
        assert!(!protocol.take_auto_start(t0 + Duration::from_secs(4)));
        assert!(protocol.take_auto_start(t0 + Duration::from_secs(5)));
        assert!(!protocol.take_auto_start(t0 + Duration::from_secs(60)));

        protocol.on_disconnect();
        let t1 = t0 + Duration::from_secs(100);
        protocol.on_connect(t1);
        assert!(protocol.take_auto_start(t1 + Duration::from_secs(5)));
    }

    #[test]
    fn test_manual_start_uses_up_auto_start() {
        let store = FakeStore::default();
        let (mut radio, peer) = MemoryRadio::pair();
        peer.set_connected(true);
        let mut protocol = TransferProtocol::new(settings(4));
        let t0 = Instant::now();
        protocol.on_connect(t0);

        protocol.start(t0 + Duration::from_secs(1), &radio, &store).unwrap();
        assert_eq!(
            protocol.poll(t0 + Duration::from_secs(1), &mut radio, &store),
            TransferStep::Completed { files: 0 }
        );
        assert!(!protocol.take_auto_start(t0 + Duration::from_secs(6)));
        assert_eq!(peer.data(), vec![b"TRANSFER_COMPLETE|0 files transferred".to_vec()]);
    }

    #[test]
    fn test_start_requires_link() {
        let store = FakeStore::default();
        let (radio, _peer) = MemoryRadio::pair();
        let mut protocol = TransferProtocol::new(settings(4));
        assert!(matches!(
            protocol.start(Instant::now(), &radio, &store),
            Err(TransferError::Link(LinkError::Disconnected))
        ));
    }
}
