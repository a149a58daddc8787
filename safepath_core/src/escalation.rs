//! The "ESCALATION" Engine - cancellable countdown before an emergency alert
//!
//! ```text
//!            trigger()              tick() hits 0 / send_now()
//!   Idle ─────────────► CountingDown ─────────────────────────► Sent
//!    ▲                      │                                    │
//!    │        cancel()      ▼                                    │
//!    └─────────────────  Cancelled            send failed ───────┘
//! ```
//!
//! The controller is a plain state machine. It decides *when* an alert must go
//! out and hands back a [`Dispatch`]; delivering it is the runtime's job. The
//! transition into `Sent` happens in the same call that produces the dispatch,
//! so a cancel that loses the race finds the countdown already over and does
//! nothing, and a cancel that wins leaves no dispatch behind.

use crate::route_monitor::CheckpointSnapshot;
use safepath_env::{Coordinate, EnvError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Countdown for the safety-check modal (default: 30 s)
    pub modal_countdown_secs: u32,

    /// Countdown for the direct SOS button (default: 3 s)
    pub sos_button_countdown_secs: u32,

    /// Remaining seconds at or below which the countdown is urgent (default: 5)
    pub urgent_threshold_secs: u32,

    /// Name shown in the alert header
    pub sender_name: Option<String>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            modal_countdown_secs: 30,
            sos_button_countdown_secs: 3,
            urgent_threshold_secs: 5,
            sender_name: None,
        }
    }
}

impl EscalationConfig {
    pub fn countdown_secs(&self, countdown: Countdown) -> u32 {
        match countdown {
            Countdown::Modal => self.modal_countdown_secs,
            Countdown::SosButton => self.sos_button_countdown_secs,
        }
    }
}

/// Errors surfaced by an escalation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscalationError {
    #[error("No emergency contacts with a phone number are configured")]
    NoContacts,

    #[error("Could not load contacts: {0}")]
    ContactStore(EnvError),

    #[error("Alert delivery failed: {0}")]
    SendFailure(EnvError),

    #[error("Current location is unknown")]
    LocationUnavailable,
}

/// Phase of the escalation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscalationPhase {
    Idle,
    CountingDown,
    Sent,
    Cancelled,
}

/// What started an escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Trigger {
    /// The user asked for help
    Manual,
    /// Route monitoring missed a checkpoint deadline
    CheckpointMissed(CheckpointSnapshot),
}

impl Trigger {
    pub fn checkpoint(&self) -> Option<&CheckpointSnapshot> {
        match self {
            Trigger::Manual => None,
            Trigger::CheckpointMissed(snapshot) => Some(snapshot),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Trigger::Manual => "manual",
            Trigger::CheckpointMissed(_) => "checkpoint_missed",
        }
    }
}

/// Countdown length profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Countdown {
    /// Safety-check modal (checkpoint misses, manual check)
    Modal,
    /// Direct SOS button
    SosButton,
}

/// Observable snapshot for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationState {
    pub phase: EscalationPhase,
    pub trigger: Option<Trigger>,
    pub remaining_seconds: u32,
    pub location: Option<Coordinate>,
    pub urgent: bool,
}

/// An alert that must be delivered now.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// Sequence number of the escalation that produced it
    pub escalation: u64,
    pub trigger: Trigger,
    pub location: Option<Coordinate>,
}

/// Result of a countdown tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No countdown is running
    Idle,
    /// Still counting down
    Counting { remaining_seconds: u32, urgent: bool },
    /// The countdown expired; deliver this alert
    Fire(Dispatch),
}

/// The escalation state machine.
#[derive(Debug, Clone)]
pub struct EscalationController {
    config: EscalationConfig,
    phase: EscalationPhase,
    trigger: Option<Trigger>,
    remaining_seconds: u32,
    location: Option<Coordinate>,

    /// A dispatch was handed out and its delivery has not been reported yet
    in_flight: bool,

    /// Number of escalations started so far
    escalations: u64,
}

impl EscalationController {
    pub fn new(config: EscalationConfig) -> Self {
        Self {
            config,
            phase: EscalationPhase::Idle,
            trigger: None,
            remaining_seconds: 0,
            location: None,
            in_flight: false,
            escalations: 0,
        }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// True when a new escalation may start: nothing is counting down and no
    /// delivery is pending. A completed `Sent` counts as idle.
    pub fn is_ready(&self) -> bool {
        !self.in_flight && matches!(self.phase, EscalationPhase::Idle | EscalationPhase::Sent)
    }

    /// Starts a countdown. Ignored (returns false) while another escalation
    /// is in progress.
    pub fn trigger(
        &mut self,
        location: Option<Coordinate>,
        trigger: Trigger,
        countdown: Countdown,
    ) -> bool {
        if !self.is_ready() {
            return false;
        }
        if location.is_some() {
            self.location = location;
        }
        self.phase = EscalationPhase::CountingDown;
        self.trigger = Some(trigger);
        self.remaining_seconds = self.config.countdown_secs(countdown);
        self.escalations += 1;
        true
    }

    /// One second elapsed.
    pub fn tick(&mut self) -> TickOutcome {
        if self.phase != EscalationPhase::CountingDown {
            return TickOutcome::Idle;
        }

        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            return match self.begin_dispatch() {
                Some(dispatch) => TickOutcome::Fire(dispatch),
                None => TickOutcome::Idle,
            };
        }

        TickOutcome::Counting {
            remaining_seconds: self.remaining_seconds,
            urgent: self.is_urgent(),
        }
    }

    /// "I'm safe". Only effective while counting down; the phase passes
    /// through `Cancelled` and settles on `Idle`.
    pub fn cancel(&mut self) -> bool {
        if self.phase != EscalationPhase::CountingDown {
            return false;
        }
        self.phase = EscalationPhase::Cancelled;
        self.clear();
        true
    }

    /// Skips the rest of the countdown.
    pub fn send_now(&mut self) -> Option<Dispatch> {
        if self.phase != EscalationPhase::CountingDown {
            return None;
        }
        self.begin_dispatch()
    }

    fn begin_dispatch(&mut self) -> Option<Dispatch> {
        let trigger = self.trigger.clone()?;
        self.phase = EscalationPhase::Sent;
        self.remaining_seconds = 0;
        self.in_flight = true;
        Some(Dispatch {
            escalation: self.escalations,
            trigger,
            location: self.location,
        })
    }

    /// Reports the delivery result of the pending dispatch. A failure hands
    /// control back to the user (`Idle`); a success leaves `Sent`.
    pub fn finish_dispatch(&mut self, delivered: bool) {
        if !self.in_flight {
            return;
        }
        self.in_flight = false;
        if !delivered {
            self.clear();
        }
    }

    fn clear(&mut self) {
        self.phase = EscalationPhase::Idle;
        self.trigger = None;
        self.remaining_seconds = 0;
    }

    /// Keeps the location attached to the next alert current.
    pub fn update_location(&mut self, location: Coordinate) {
        self.location = Some(location);
    }

    /// Drops the known fix; later alerts say the location is unavailable.
    pub fn forget_location(&mut self) {
        self.location = None;
    }

    pub fn phase(&self) -> EscalationPhase {
        self.phase
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn location(&self) -> Option<Coordinate> {
        self.location
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// The UI's cue for the last seconds of a countdown.
    pub fn is_urgent(&self) -> bool {
        self.phase == EscalationPhase::CountingDown
            && self.remaining_seconds <= self.config.urgent_threshold_secs
    }

    pub fn escalation_count(&self) -> u64 {
        self.escalations
    }

    pub fn state(&self) -> EscalationState {
        EscalationState {
            phase: self.phase,
            trigger: self.trigger.clone(),
            remaining_seconds: self.remaining_seconds,
            location: self.location,
            urgent: self.is_urgent(),
        }
    }
}

impl Default for EscalationController {
    fn default() -> Self {
        Self::new(EscalationConfig::default())
    }
}
