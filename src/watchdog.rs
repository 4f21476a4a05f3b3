// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Per-domain liveness watchdog
//!
//! Each execution domain that can block registers itself and feeds its
//! [`WatchdogHandle`] before every potentially blocking step. A supervisor
//! calls [`Watchdog::check`] periodically and reports the domains whose last
//! feed is older than the timeout.
//!
//! On the instrument an expired domain means a hardware reset. On a host the
//! supervisor only logs it and raises the expired flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{error, info};

#[derive(Debug)]
struct DomainClock {
    name: String,
    /// Milliseconds since the watchdog epoch at the last feed.
    last_feed_ms: AtomicU64,
    expired: AtomicBool,
}

/// Liveness token handed to one execution domain.
#[derive(Debug, Clone)]
pub struct WatchdogHandle {
    epoch: Instant,
    clock: Arc<DomainClock>,
}

impl WatchdogHandle {
    pub fn feed(&self) {
        self.feed_at(Instant::now());
    }

    pub fn feed_at(&self, now: Instant) {
        let ms = now.saturating_duration_since(self.epoch).as_millis() as u64;
        self.clock.last_feed_ms.store(ms, Ordering::Relaxed);
        if self.clock.expired.swap(false, Ordering::Relaxed) {
            info!("Domain '{}' is alive again", self.clock.name);
        }
    }

    pub fn name(&self) -> &str {
        &self.clock.name
    }
}

#[derive(Debug)]
pub struct Watchdog {
    epoch: Instant,
    timeout: Duration,
    domains: Mutex<Vec<Arc<DomainClock>>>,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            timeout,
            domains: Mutex::new(Vec::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a domain. The registration counts as its first feed.
    pub fn register(&self, name: &str) -> WatchdogHandle {
        let clock = Arc::new(DomainClock {
            name: name.to_string(),
            last_feed_ms: AtomicU64::new(0),
            expired: AtomicBool::new(false),
        });
        let handle = WatchdogHandle {
            epoch: self.epoch,
            clock: clock.clone(),
        };
        handle.feed();
        self.domains
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(clock);
        handle
    }

    /// Names of the domains that missed their deadline at `now`.
    ///
    /// Each domain is logged once when it first expires.
    pub fn check(&self, now: Instant) -> Vec<String> {
        let now_ms = now.saturating_duration_since(self.epoch).as_millis() as u64;
        let timeout_ms = self.timeout.as_millis() as u64;
        let domains = self
            .domains
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut expired = Vec::new();
        for clock in domains.iter() {
            let last = clock.last_feed_ms.load(Ordering::Relaxed);
            if now_ms.saturating_sub(last) > timeout_ms {
                if !clock.expired.swap(true, Ordering::Relaxed) {
                    error!(
                        "Watchdog: domain '{}' not fed for {} ms",
                        clock.name,
                        now_ms.saturating_sub(last)
                    );
                }
                expired.push(clock.name.clone());
            }
        }
        expired
    }
}
