// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! One offload session: the snapshot of records to send and the file being
//! streamed.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::time::Instant;

use log::{debug, info, warn};

use super::framing;
use crate::radio::{LinkError, RadioLink};
use crate::storage::{RecordEntry, RecordStore};

/// What a single session step emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStep {
    /// No session.
    Idle,
    /// Inside the pacing interval, nothing sent.
    Paced,
    /// `FILE_START` sent for this file.
    Announced(String),
    /// One chunk of this many bytes sent.
    Chunk(usize),
    /// `FILE_END` sent for this file.
    FileEnded(String),
    /// `TRANSFER_COMPLETE` sent, the session is over.
    Completed { files: usize },
    /// The link went away, the session was dropped without closing frames.
    Cancelled,
}

struct ActiveFile {
    entry: RecordEntry,
    bytes_sent: u64,
    reader: Box<dyn Read + Send>,
}

/// Transfer state for one link connection.
///
/// Files are taken from a listing captured when the session starts; records
/// written afterwards wait for the next session.
pub struct TransferSession {
    queue: VecDeque<RecordEntry>,
    current: Option<ActiveFile>,
    files_sent: usize,
    started_at: Instant,
    pub(super) last_emit: Option<Instant>,
}

impl TransferSession {
    pub fn new(listing: Vec<RecordEntry>, now: Instant) -> Self {
        Self {
            queue: listing.into(),
            current: None,
            files_sent: 0,
            started_at: now,
            last_emit: None,
        }
    }

    pub fn current_file_name(&self) -> Option<&str> {
        self.current.as_ref().map(|f| f.entry.name.as_str())
    }

    /// Announced size of the current file.
    pub fn total_bytes(&self) -> Option<u64> {
        self.current.as_ref().map(|f| f.entry.size)
    }

    pub fn bytes_sent(&self) -> Option<u64> {
        self.current.as_ref().map(|f| f.bytes_sent)
    }

    /// A file is open and being streamed.
    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }

    /// Between files: the next step opens a file or completes the session.
    pub fn pending(&self) -> bool {
        self.current.is_none()
    }

    pub fn files_sent(&self) -> usize {
        self.files_sent
    }

    pub fn files_remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Emit the next frame.
    pub(super) fn step(
        &mut self,
        radio: &mut dyn RadioLink,
        store: &dyn RecordStore,
        chunk_size: usize,
    ) -> Result<TransferStep, LinkError> {
        let Some(active) = self.current.as_mut() else {
            return self.open_next(radio, store);
        };

        let remaining = active.entry.size.saturating_sub(active.bytes_sent);
        if remaining == 0 {
            return self.finish_file(radio);
        }

        // Never read past the announced size, even if the file grew.
        let want = remaining.min(chunk_size as u64) as usize;
        let mut buf = vec![0u8; want];
        match read_some(&mut active.reader, &mut buf) {
            Ok(n) if n > 0 => {
                radio.notify_data(&buf[..n])?;
                let before = active.bytes_sent * 100 / active.entry.size;
                active.bytes_sent += n as u64;
                let after = active.bytes_sent * 100 / active.entry.size;
                if after / 20 != before / 20 {
                    debug!("{} {}%", active.entry.name, after);
                }
                Ok(TransferStep::Chunk(n))
            }
            Ok(_) => {
                warn!(
                    "{} ended after {} of {} announced bytes",
                    active.entry.name, active.bytes_sent, active.entry.size
                );
                self.finish_file(radio)
            }
            Err(e) => {
                warn!("Read error on {}: {}", active.entry.name, e);
                self.finish_file(radio)
            }
        }
    }

    fn open_next(
        &mut self,
        radio: &mut dyn RadioLink,
        store: &dyn RecordStore,
    ) -> Result<TransferStep, LinkError> {
        while let Some(entry) = self.queue.pop_front() {
            let reader = match store.open(&entry.name) {
                Ok(reader) => reader,
                Err(e) => {
                    warn!("Skipping {}: {}", entry.name, e);
                    continue;
                }
            };
            radio.notify_data(framing::file_start(&entry.name, entry.size).as_bytes())?;
            info!("Starting transfer: {} ({} bytes)", entry.name, entry.size);
            let name = entry.name.clone();
            self.current = Some(ActiveFile {
                entry,
                bytes_sent: 0,
                reader,
            });
            return Ok(TransferStep::Announced(name));
        }

        radio.notify_data(framing::transfer_complete(self.files_sent).as_bytes())?;
        info!("All files transferred ({})", self.files_sent);
        Ok(TransferStep::Completed {
            files: self.files_sent,
        })
    }

    fn finish_file(&mut self, radio: &mut dyn RadioLink) -> Result<TransferStep, LinkError> {
        let Some(active) = self.current.take() else {
            return Ok(TransferStep::Idle);
        };
        radio.notify_data(framing::file_end(&active.entry.name).as_bytes())?;
        info!("Transferred: {}", active.entry.name);
        self.files_sent += 1;
        Ok(TransferStep::FileEnded(active.entry.name))
    }
}

fn read_some(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}
