// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Operating flow of the instrument
//!
//! ```text
//! Boot -> SelfCheck -> GpsSearch -> InsertPrompt -> Countdown -> Analyzing
//!                                        ^                          |
//!                                        +------ FileCreated <------+
//!
//! InsertPrompt | Analyzing -> Transfer -> InsertPrompt
//! ```
//!
//! Every state records the instant it was entered. Timed states expire on
//! their own through [`FlowStateMachine::due`]; the caller applies the
//! returned transition. Any transition outside the table is refused with
//! [`FlowError::InvalidStateTransition`] and leaves the machine untouched.

use std::fmt;
use std::time::{Duration, Instant};

use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Boot,
    SelfCheck,
    GpsSearch,
    InsertPrompt,
    Countdown,
    Analyzing,
    FileCreated,
    Transfer,
}

impl FlowState {
    pub fn can_transition_to(self, to: FlowState) -> bool {
        use FlowState::*;
        matches!(
            (self, to),
            (Boot, SelfCheck)
                | (SelfCheck, GpsSearch)
                | (GpsSearch, InsertPrompt)
                | (InsertPrompt, Countdown)
                | (InsertPrompt, Transfer)
                | (Countdown, Analyzing)
                | (Analyzing, FileCreated)
                | (Analyzing, Transfer)
                | (FileCreated, InsertPrompt)
                | (Transfer, InsertPrompt)
        )
    }

    /// States a transfer request may interrupt.
    pub fn can_preempt(self) -> bool {
        matches!(self, FlowState::InsertPrompt | FlowState::Analyzing)
    }

    /// Start-up states, before the instrument is ready for a sample.
    pub fn is_startup(self) -> bool {
        matches!(
            self,
            FlowState::Boot | FlowState::SelfCheck | FlowState::GpsSearch
        )
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowState::Boot => "boot",
            FlowState::SelfCheck => "self_check",
            FlowState::GpsSearch => "gps_search",
            FlowState::InsertPrompt => "insert_prompt",
            FlowState::Countdown => "countdown",
            FlowState::Analyzing => "analyzing",
            FlowState::FileCreated => "file_created",
            FlowState::Transfer => "transfer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("invalid state transition {from} -> {to}")]
    InvalidStateTransition { from: FlowState, to: FlowState },
}

/// How long each timed state lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowDurations {
    pub boot: Duration,
    pub self_check: Duration,
    /// Upper bound; a valid fix ends the search earlier.
    pub gps_search: Duration,
    pub insert_prompt: Duration,
    pub countdown: Duration,
    pub analyzing: Duration,
    pub file_created: Duration,
}

impl Default for FlowDurations {
    fn default() -> Self {
        Self {
            boot: Duration::from_secs(3),
            self_check: Duration::from_secs(3),
            gps_search: Duration::from_secs(10),
            insert_prompt: Duration::from_secs(2),
            countdown: Duration::from_secs(5),
            analyzing: Duration::from_secs(45),
            file_created: Duration::from_secs(3),
        }
    }
}

impl FlowDurations {
    /// Duration of `state`, `None` for the untimed transfer state.
    pub fn of(&self, state: FlowState) -> Option<Duration> {
        match state {
            FlowState::Boot => Some(self.boot),
            FlowState::SelfCheck => Some(self.self_check),
            FlowState::GpsSearch => Some(self.gps_search),
            FlowState::InsertPrompt => Some(self.insert_prompt),
            FlowState::Countdown => Some(self.countdown),
            FlowState::Analyzing => Some(self.analyzing),
            FlowState::FileCreated => Some(self.file_created),
            FlowState::Transfer => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowStateMachine {
    state: FlowState,
    entered_at: Instant,
    suspended: Option<FlowState>,
    durations: FlowDurations,
}

impl FlowStateMachine {
    pub fn new(durations: FlowDurations, now: Instant) -> Self {
        Self {
            state: FlowState::Boot,
            entered_at: now,
            suspended: None,
            durations,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn entered_at(&self) -> Instant {
        self.entered_at
    }

    /// State interrupted by the running transfer.
    pub fn suspended(&self) -> Option<FlowState> {
        self.suspended
    }

    pub fn durations(&self) -> &FlowDurations {
        &self.durations
    }

    pub fn transition(&mut self, to: FlowState, now: Instant) -> Result<(), FlowError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            warn!("Refusing flow transition {} -> {}", from, to);
            return Err(FlowError::InvalidStateTransition { from, to });
        }
        self.suspended = match to {
            FlowState::Transfer => Some(from),
            _ => None,
        };
        self.enter(to, now);
        Ok(())
    }

    /// Return to InsertPrompt from wherever the instrument is.
    ///
    /// Start-up states are left alone; returns whether the flow moved.
    pub fn reset(&mut self, now: Instant) -> bool {
        if self.state.is_startup() {
            warn!("Reset ignored during {}", self.state);
            return false;
        }
        self.suspended = None;
        self.enter(FlowState::InsertPrompt, now);
        true
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.entered_at)
    }

    /// Time left in the current timed state, clamped at zero.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.durations
            .of(self.state)
            .map(|d| d.saturating_sub(self.elapsed(now)))
    }

    /// Automatic transition due at `now`, if any.
    pub fn due(&self, now: Instant, has_fix: bool) -> Option<FlowState> {
        let expired = self.remaining(now).is_some_and(|r| r.is_zero());
        match self.state {
            FlowState::GpsSearch if has_fix || expired => Some(FlowState::InsertPrompt),
            FlowState::Transfer => None,
            _ if !expired => None,
            FlowState::Boot => Some(FlowState::SelfCheck),
            FlowState::SelfCheck => Some(FlowState::GpsSearch),
            FlowState::InsertPrompt => Some(FlowState::Countdown),
            FlowState::Countdown => Some(FlowState::Analyzing),
            FlowState::Analyzing => Some(FlowState::FileCreated),
            FlowState::FileCreated => Some(FlowState::InsertPrompt),
            FlowState::GpsSearch => None,
        }
    }

    fn enter(&mut self, to: FlowState, now: Instant) {
        info!("Flow: {} -> {}", self.state, to);
        self.state = to;
        self.entered_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [FlowState; 8] = [
        FlowState::Boot,
        FlowState::SelfCheck,
        FlowState::GpsSearch,
        FlowState::InsertPrompt,
        FlowState::Countdown,
        FlowState::Analyzing,
        FlowState::FileCreated,
        FlowState::Transfer,
    ];

    fn machine_in(state: FlowState, now: Instant) -> FlowStateMachine {
        let mut machine = FlowStateMachine::new(FlowDurations::default(), now);
        machine.state = state;
        machine
    }

    #[test]
    fn test_transition_table() {
        let valid = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .count();
        assert_eq!(valid, 10);
        assert!(FlowState::InsertPrompt.can_transition_to(FlowState::Transfer));
        assert!(FlowState::Analyzing.can_transition_to(FlowState::Transfer));
        assert!(!FlowState::Countdown.can_transition_to(FlowState::Transfer));
        assert!(!FlowState::Transfer.can_transition_to(FlowState::Analyzing));
    }

    #[test]
    fn test_invalid_transition_is_noop() {
        let t0 = Instant::now();
        let mut machine = machine_in(FlowState::Countdown, t0);
        let later = t0 + Duration::from_secs(1);
        assert_eq!(
            machine.transition(FlowState::Transfer, later),
            Err(FlowError::InvalidStateTransition {
                from: FlowState::Countdown,
                to: FlowState::Transfer
            })
        );
        assert_eq!(machine.state(), FlowState::Countdown);
        assert_eq!(machine.entered_at(), t0);
    }

    #[test]
    fn test_transfer_records_and_clears_suspended_state() {
        let t0 = Instant::now();
        let mut machine = machine_in(FlowState::Analyzing, t0);
        machine
            .transition(FlowState::Transfer, t0 + Duration::from_secs(20))
            .unwrap();
        assert_eq!(machine.suspended(), Some(FlowState::Analyzing));
        assert_eq!(machine.remaining(t0), None);
        assert_eq!(machine.due(t0 + Duration::from_secs(999), true), None);

        // Leaving the transfer never resumes the analysis.
        assert!(machine
            .transition(FlowState::Analyzing, t0 + Duration::from_secs(21))
            .is_err());
        machine
            .transition(FlowState::InsertPrompt, t0 + Duration::from_secs(21))
            .unwrap();
        assert_eq!(machine.suspended(), None);
        assert_eq!(machine.remaining(t0 + Duration::from_secs(21)), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_remaining_is_clamped() {
        let t0 = Instant::now();
        let machine = machine_in(FlowState::Countdown, t0);
        assert_eq!(
            machine.remaining(t0 + Duration::from_secs(2)),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            machine.remaining(t0 + Duration::from_secs(60)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_full_cycle_follows_durations() {
        let mut now = Instant::now();
        let mut machine = FlowStateMachine::new(FlowDurations::default(), now);
        let mut visited = vec![machine.state()];

        for _ in 0..200 {
            now += Duration::from_millis(500);
            if let Some(next) = machine.due(now, false) {
                machine.transition(next, now).unwrap();
                visited.push(next);
            }
            if visited.len() == 8 {
                break;
            }
        }
        assert_eq!(
            visited,
            vec![
                FlowState::Boot,
                FlowState::SelfCheck,
                FlowState::GpsSearch,
                FlowState::InsertPrompt,
                FlowState::Countdown,
                FlowState::Analyzing,
                FlowState::FileCreated,
                FlowState::InsertPrompt,
            ]
        );
    }

    #[test]
    fn test_gps_search_ends_on_fix() {
        let t0 = Instant::now();
        let machine = machine_in(FlowState::GpsSearch, t0);
        let soon = t0 + Duration::from_secs(1);
        assert_eq!(machine.due(soon, false), None);
        assert_eq!(machine.due(soon, true), Some(FlowState::InsertPrompt));
        assert_eq!(
            machine.due(t0 + Duration::from_secs(10), false),
            Some(FlowState::InsertPrompt)
        );
    }

    #[test]
    fn test_reset() {
        let t0 = Instant::now();
        let mut machine = machine_in(FlowState::SelfCheck, t0);
        assert!(!machine.reset(t0));
        assert_eq!(machine.state(), FlowState::SelfCheck);

        let mut machine = machine_in(FlowState::Countdown, t0);
        let later = t0 + Duration::from_secs(3);
        assert!(machine.reset(later));
        assert_eq!(machine.state(), FlowState::InsertPrompt);
        assert_eq!(machine.entered_at(), later);
    }

    #[test]
    fn test_preemptible_states() {
        let preemptible: Vec<_> = ALL.iter().filter(|s| s.can_preempt()).collect();
        assert_eq!(
            preemptible,
            vec![&FlowState::InsertPrompt, &FlowState::Analyzing]
        );
    }
}
