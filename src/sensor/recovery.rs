// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Recovery policy for a probe that stops answering
//!
//! RS-485 probes occasionally latch up and go silent until the bus is
//! reinitialised. The policy counts consecutive failed basic-panel reads and,
//! once the threshold is reached, closes and reopens the bus. Resets are
//! rate limited by a cooldown so a dead probe does not turn into a reset
//! storm.

use std::time::{Duration, Instant};

use log::{info, warn};

use crate::modbus::BusReset;

/// Consecutive failure count and the time of the last bus reset.
#[derive(Debug, Clone, Copy)]
pub struct FailureCounter {
    pub consecutive_failures: u32,
    pub last_reset: Instant,
}

/// Threshold and cooldown for [`FailureRecovery`].
#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    pub threshold: u32,
    pub cooldown: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(10),
        }
    }
}

/// Outcome of reporting a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Below threshold, or still inside the cooldown window.
    None,
    /// The bus was reset and the counter cleared.
    BusReset,
}

#[derive(Debug)]
pub struct FailureRecovery {
    policy: RecoveryPolicy,
    counter: FailureCounter,
    resets: u64,
}

impl FailureRecovery {
    /// Create the policy. `now` counts as the last reset, so no reset can
    /// happen within the first cooldown window after boot.
    pub fn new(policy: RecoveryPolicy, now: Instant) -> Self {
        Self {
            policy,
            counter: FailureCounter {
                consecutive_failures: 0,
                last_reset: now,
            },
            resets: 0,
        }
    }

    pub fn counter(&self) -> FailureCounter {
        self.counter
    }

    /// Number of bus resets performed since construction.
    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn on_success(&mut self) {
        self.counter.consecutive_failures = 0;
    }

    /// Record a failed read and reset `bus` if the policy calls for it.
    pub fn on_failure<B: BusReset + ?Sized>(&mut self, now: Instant, bus: &mut B) -> RecoveryAction {
        self.counter.consecutive_failures = self.counter.consecutive_failures.saturating_add(1);
        warn!(
            "Soil probe failure count: {}/{}",
            self.counter.consecutive_failures, self.policy.threshold
        );

        if self.counter.consecutive_failures < self.policy.threshold {
            return RecoveryAction::None;
        }
        if now.saturating_duration_since(self.counter.last_reset) < self.policy.cooldown {
            return RecoveryAction::None;
        }

        info!("Attempting soil probe recovery, resetting bus");
        if let Err(e) = bus.reset_bus() {
            // The attempt still counts; the next one waits for the cooldown.
            warn!("Bus reset failed: {}", e);
        }
        self.counter.consecutive_failures = 0;
        self.counter.last_reset = now;
        self.resets += 1;
        RecoveryAction::BusReset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::BusError;

    #[derive(Default)]
    struct CountingBus {
        resets: usize,
    }

    impl BusReset for CountingBus {
        fn reset_bus(&mut self) -> Result<(), BusError> {
            self.resets += 1;
            Ok(())
        }
    }

    #[test]
    fn test_no_reset_inside_cooldown() {
        let boot = Instant::now();
        let mut recovery = FailureRecovery::new(RecoveryPolicy::default(), boot);
        let mut bus = CountingBus::default();

        for i in 0..5 {
            let action = recovery.on_failure(boot + Duration::from_secs(i), &mut bus);
            assert_eq!(action, RecoveryAction::None);
        }
        assert_eq!(bus.resets, 0);
        assert_eq!(recovery.counter().consecutive_failures, 5);
    }

    #[test]
    fn test_exactly_one_reset_after_cooldown() {
        let boot = Instant::now();
        let mut recovery = FailureRecovery::new(RecoveryPolicy::default(), boot);
        let mut bus = CountingBus::default();
        let later = boot + Duration::from_secs(11);

        let actions: Vec<_> = (0..5).map(|_| recovery.on_failure(later, &mut bus)).collect();
        assert!(actions[..4].iter().all(|a| *a == RecoveryAction::None));
        assert_eq!(actions[4], RecoveryAction::BusReset);
        assert_eq!(bus.resets, 1);
        assert_eq!(recovery.counter().consecutive_failures, 0);
        assert_eq!(recovery.counter().last_reset, later);
    }

    #[test]
    fn test_cooldown_applies_between_resets() {
        let boot = Instant::now();
        let mut recovery = FailureRecovery::new(RecoveryPolicy::default(), boot);
        let mut bus = CountingBus::default();

        let first = boot + Duration::from_secs(10);
        for _ in 0..5 {
            recovery.on_failure(first, &mut bus);
        }
        assert_eq!(bus.resets, 1);

        let soon = first + Duration::from_secs(3);
        for _ in 0..6 {
            recovery.on_failure(soon, &mut bus);
        }
        assert_eq!(bus.resets, 1);

        // Counter kept climbing, so the first failure past the cooldown resets.
        let action = recovery.on_failure(first + Duration::from_secs(10), &mut bus);
        assert_eq!(action, RecoveryAction::BusReset);
        assert_eq!(bus.resets, 2);
        assert_eq!(recovery.resets(), 2);
    }

    #[test]
    fn test_success_clears_counter() {
        let boot = Instant::now();
        let mut recovery = FailureRecovery::new(RecoveryPolicy::default(), boot);
        let mut bus = CountingBus::default();
        let later = boot + Duration::from_secs(60);

        for _ in 0..4 {
            recovery.on_failure(later, &mut bus);
        }
        recovery.on_success();
        for _ in 0..4 {
            assert_eq!(recovery.on_failure(later, &mut bus), RecoveryAction::None);
        }
        assert_eq!(bus.resets, 0);
    }
}
