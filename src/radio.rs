// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Wireless link contract
//!
//! The radio stack delivers connection changes and command writes from its
//! own execution context. Those callbacks must not block, so they only push
//! [`RadioEvent`]s into a bounded queue through a [`RadioEventSender`]. The
//! control loop drains the queue and is the only place events are acted on.
//!
//! Outbound traffic goes through [`RadioLink`]: one notify-only data channel
//! carrying the transfer framing and one command channel for
//! acknowledgements.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Command written by the companion on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioCommand {
    StartTransfer,
    FormatStorage,
    ResetSystem,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown command: {0:?}")]
pub struct UnknownCommand(pub String);

impl FromStr for RadioCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "START_TRANSFER" => Ok(RadioCommand::StartTransfer),
            "FORMAT_SD" => Ok(RadioCommand::FormatStorage),
            "RESET_SYSTEM" => Ok(RadioCommand::ResetSystem),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for RadioCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RadioCommand::StartTransfer => "START_TRANSFER",
            RadioCommand::FormatStorage => "FORMAT_SD",
            RadioCommand::ResetSystem => "RESET_SYSTEM",
        };
        f.write_str(text)
    }
}

/// Acknowledgements sent on the command channel.
pub mod ack {
    pub const TRANSFER_STARTED: &str = "TRANSFER_STARTED";
    pub const TRANSFER_BUSY: &str = "TRANSFER_BUSY";
    pub const SD_FORMATTED: &str = "SD_FORMATTED";
    pub const FORMAT_FAILED: &str = "FORMAT_FAILED";
    pub const SYSTEM_RESET: &str = "SYSTEM_RESET";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioEvent {
    Connected,
    Disconnected,
    Command(RadioCommand),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("wireless link disconnected")]
    Disconnected,
    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Outbound side of the wireless link.
pub trait RadioLink: Send {
    fn is_connected(&self) -> bool;

    /// Push one payload on the data channel.
    fn notify_data(&mut self, payload: &[u8]) -> Result<(), LinkError>;

    /// Push one payload on the command channel.
    fn notify_command(&mut self, payload: &[u8]) -> Result<(), LinkError>;
}

/// Producer half of the radio event queue, handed to the link callbacks.
#[derive(Debug, Clone)]
pub struct RadioEventSender {
    tx: mpsc::Sender<RadioEvent>,
}

/// Create the bounded event queue.
pub fn event_queue(capacity: usize) -> (RadioEventSender, mpsc::Receiver<RadioEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (RadioEventSender { tx }, rx)
}

impl RadioEventSender {
    /// Enqueue without waiting. A full queue drops the event.
    pub fn post(&self, event: RadioEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("Radio event queue full, dropping {:?}", event);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Radio event queue closed");
                false
            }
        }
    }

    pub fn connected(&self) -> bool {
        self.post(RadioEvent::Connected)
    }

    pub fn disconnected(&self) -> bool {
        self.post(RadioEvent::Disconnected)
    }

    /// Decode a raw write on the command channel and enqueue it.
    pub fn command_written(&self, payload: &[u8]) -> bool {
        let text = String::from_utf8_lossy(payload);
        match text.parse::<RadioCommand>() {
            Ok(command) => {
                info!("Radio command received: {}", command);
                self.post(RadioEvent::Command(command))
            }
            Err(e) => {
                warn!("Ignoring radio write: {}", e);
                false
            }
        }
    }
}

/// Link that is never connected, for units without a radio.
#[derive(Debug, Default)]
pub struct OfflineRadio;

impl RadioLink for OfflineRadio {
    fn is_connected(&self) -> bool {
        false
    }

    fn notify_data(&mut self, _payload: &[u8]) -> Result<(), LinkError> {
        Err(LinkError::Disconnected)
    }

    fn notify_command(&mut self, _payload: &[u8]) -> Result<(), LinkError> {
        Err(LinkError::Disconnected)
    }
}

#[derive(Debug, Default)]
struct MemoryLinkState {
    data: Vec<Vec<u8>>,
    commands: Vec<Vec<u8>>,
}

/// In-memory link recording every notification.
///
/// The paired [`MemoryRadioPeer`] plays the companion device: it toggles the
/// connection and reads back what was sent.
#[derive(Debug)]
pub struct MemoryRadio {
    connected: Arc<AtomicBool>,
    state: Arc<Mutex<MemoryLinkState>>,
}

#[derive(Debug, Clone)]
pub struct MemoryRadioPeer {
    connected: Arc<AtomicBool>,
    state: Arc<Mutex<MemoryLinkState>>,
}

impl MemoryRadio {
    pub fn pair() -> (Self, MemoryRadioPeer) {
        let connected = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(MemoryLinkState::default()));
        (
            Self {
                connected: connected.clone(),
                state: state.clone(),
            },
            MemoryRadioPeer { connected, state },
        )
    }

    fn lock(&self) -> MutexGuard<'_, MemoryLinkState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RadioLink for MemoryRadio {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn notify_data(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::Disconnected);
        }
        self.lock().data.push(payload.to_vec());
        Ok(())
    }

    fn notify_command(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::Disconnected);
        }
        self.lock().commands.push(payload.to_vec());
        Ok(())
    }
}

impl MemoryRadioPeer {
    fn lock(&self) -> MutexGuard<'_, MemoryLinkState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Data channel notifications received so far.
    pub fn data(&self) -> Vec<Vec<u8>> {
        self.lock().data.clone()
    }

    /// Command channel notifications, as text.
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect()
    }
}
