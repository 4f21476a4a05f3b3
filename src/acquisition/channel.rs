// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Single-slot, latest-value-wins handoff between execution domains
//!
//! The acquisition worker publishes every good sample; the control loop polls
//! without ever waiting. A new value replaces an unread one, so the reader
//! always sees the freshest sample and intermediate ones are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct Slot<T> {
    value: Mutex<Option<T>>,
    overwritten: AtomicU64,
}

impl<T> Slot<T> {
    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        // The critical sections cannot panic, a poisoned slot is still consistent.
        self.value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Writing half, held by the acquisition domain.
#[derive(Debug)]
pub struct SamplePublisher<T> {
    slot: Arc<Slot<T>>,
}

/// Reading half, held by the control domain.
#[derive(Debug)]
pub struct SampleReceiver<T> {
    slot: Arc<Slot<T>>,
}

/// Create a connected publisher/receiver pair with an empty slot.
pub fn channel<T>() -> (SamplePublisher<T>, SampleReceiver<T>) {
    let slot = Arc::new(Slot {
        value: Mutex::new(None),
        overwritten: AtomicU64::new(0),
    });
    (
        SamplePublisher { slot: slot.clone() },
        SampleReceiver { slot },
    )
}

impl<T> SamplePublisher<T> {
    /// Store `value`, replacing any unread one.
    ///
    /// Returns `true` when an unread value was overwritten.
    pub fn publish(&self, value: T) -> bool {
        let replaced = self.slot.lock().replace(value).is_some();
        if replaced {
            self.slot.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        replaced
    }
}

impl<T> SampleReceiver<T> {
    /// Take the latest value, or `None` if nothing new was published since
    /// the last call.
    pub fn try_take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    /// How many published values were never read.
    pub fn overwritten(&self) -> u64 {
        self.slot.overwritten.load(Ordering::Relaxed)
    }
}
