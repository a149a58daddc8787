//! The "ROUTE" Engine - checkpoint generation and progress evaluation
//!
//! Turns a polyline into an ordered list of checkpoints, gives each one an
//! arrival deadline derived from an assumed travel speed, and on every
//! evaluation tick decides whether the current checkpoint was reached, missed,
//! or is still pending.
//!
//! The engine is pure: it never reads a clock. Callers pass `now` in, which is
//! what lets the same code run under tokio and under the virtual clock.

use crate::geodesy::{haversine_distance, path_length};
use safepath_env::{Coordinate, SessionId};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Configuration for route monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Arrival tolerance around each checkpoint (default: 50 m)
    pub checkpoint_radius_m: f64,

    /// Assumed average travel speed for deadlines (default: 40 km/h)
    pub average_speed_kmh: f64,

    /// Seconds between two progress evaluations (default: 5)
    pub evaluation_interval_secs: u64,

    /// Checkpoints are never generated closer than this (default: 1000 m)
    pub min_checkpoint_spacing_m: f64,

    /// Number of segments automatic generation aims for (default: 5)
    pub target_segments: u32,

    /// Longest wait for a single location fix (default: 15)
    pub location_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            checkpoint_radius_m: 50.0,
            average_speed_kmh: 40.0,
            evaluation_interval_secs: 5,
            min_checkpoint_spacing_m: 1_000.0,
            target_segments: 5,
            location_timeout_secs: 15,
        }
    }
}

impl MonitorConfig {
    /// Evaluation period as a `Duration`, never shorter than one second.
    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs.max(1))
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_secs(self.location_timeout_secs)
    }

    /// Average speed in meters per second.
    pub fn speed_mps(&self) -> f64 {
        self.average_speed_kmh * 1_000.0 / 3_600.0
    }

    /// Time needed to cover `distance_m` at the average speed.
    ///
    /// `None` when the speed makes the budget unrepresentable (zero or
    /// negative speed); such checkpoints never time out.
    pub fn travel_time(&self, distance_m: f64) -> Option<Duration> {
        Duration::try_from_secs_f64(distance_m / self.speed_mps()).ok()
    }

    /// Spacing between automatically generated checkpoints for a route of
    /// `total_m` meters.
    pub fn checkpoint_interval(&self, total_m: f64) -> f64 {
        let segments = f64::from(self.target_segments.max(1));
        self.min_checkpoint_spacing_m.max(total_m / segments)
    }
}

/// Errors raised by route setup and monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// Too few points, or a point that is not a usable coordinate
    #[error("Invalid route: {reason}")]
    InvalidRoute { reason: String },

    #[error("No route has been initialised")]
    NoRoute,

    #[error("Checkpoints can only be added to a manual route")]
    AutomaticMode,

    #[error("Route is being monitored")]
    MonitoringActive,

    #[error("Route has no pending checkpoint to monitor")]
    NoCheckpoints,
}

/// How a route gets its checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    /// Derived from the polyline geometry
    Automatic,
    /// Placed one by one with `add_checkpoint`
    Manual,
}

impl std::str::FromStr for RouteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "automatic" | "auto" => Ok(RouteMode::Automatic),
            "manual" => Ok(RouteMode::Manual),
            _ => Err(format!("Unknown route mode: {}", s)),
        }
    }
}

/// Progress of a single checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointStatus {
    Pending,
    Reached,
    Missed,
}

/// A waypoint with a position, arrival radius and deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Stable identifier within the route (`checkpoint_1`, `checkpoint_2`, ...)
    pub id: String,

    /// Human label
    pub name: String,

    pub position: Coordinate,

    /// Arrival tolerance in meters
    pub radius_m: f64,

    /// Deadline, set when monitoring starts
    pub expected_arrival: Option<SystemTime>,

    pub status: CheckpointStatus,

    pub reached_at: Option<SystemTime>,

    pub missed_at: Option<SystemTime>,

    /// True for the final checkpoint of an automatic route
    pub is_destination: bool,
}

impl Checkpoint {
    /// Creates a pending checkpoint with the 1-based sequence number `seq`.
    pub fn new(seq: usize, name: impl Into<String>, position: Coordinate, radius_m: f64) -> Self {
        Self {
            id: format!("checkpoint_{}", seq),
            name: name.into(),
            position,
            radius_m,
            expected_arrival: None,
            status: CheckpointStatus::Pending,
            reached_at: None,
            missed_at: None,
            is_destination: false,
        }
    }

    /// Creates the final "Destination" checkpoint.
    pub fn destination(seq: usize, position: Coordinate, radius_m: f64) -> Self {
        Self {
            is_destination: true,
            ..Self::new(seq, "Destination", position, radius_m)
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == CheckpointStatus::Pending
    }

    /// Pending -> Reached. Returns false if the checkpoint was already settled.
    pub fn mark_reached(&mut self, at: SystemTime) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = CheckpointStatus::Reached;
        self.reached_at = Some(at);
        true
    }

    /// Pending -> Missed. Returns false if the checkpoint was already settled.
    pub fn mark_missed(&mut self, at: SystemTime) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = CheckpointStatus::Missed;
        self.missed_at = Some(at);
        true
    }

    /// Read-only copy of the fields an escalation needs.
    pub fn snapshot(&self) -> CheckpointSnapshot {
        CheckpointSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            position: self.position,
            expected_arrival: self.expected_arrival,
        }
    }
}

/// Detached copy of a checkpoint, carried by an escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    pub id: String,
    pub name: String,
    pub position: Coordinate,
    pub expected_arrival: Option<SystemTime>,
}

/// Outcome of an evaluation tick that settled a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Reached { checkpoint: Checkpoint, index: usize },
    Missed { checkpoint: Checkpoint, index: usize },
}

impl MonitorEvent {
    pub fn checkpoint(&self) -> &Checkpoint {
        match self {
            MonitorEvent::Reached { checkpoint, .. } | MonitorEvent::Missed { checkpoint, .. } => {
                checkpoint
            }
        }
    }

    pub fn index(&self) -> usize {
        match self {
            MonitorEvent::Reached { index, .. } | MonitorEvent::Missed { index, .. } => *index,
        }
    }
}

/// Summary of a route's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteProgress {
    pub total: usize,
    pub reached: usize,
    pub missed: usize,
    pub pending: usize,
    pub current_index: usize,
    pub active: bool,
}

impl RouteProgress {
    /// Every checkpoint is settled.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.pending == 0
    }
}

/// Generates checkpoints along a polyline.
///
/// Segment lengths are accumulated vertex by vertex; at each interior vertex
/// where the accumulator reaches the interval a checkpoint is emitted and the
/// accumulator restarts. The last point always becomes the destination.
pub fn generate_checkpoints(route: &[Coordinate], config: &MonitorConfig) -> Vec<Checkpoint> {
    let Some(&last) = route.last() else {
        return Vec::new();
    };

    let interval = config.checkpoint_interval(path_length(route));
    let mut checkpoints = Vec::new();
    let mut accumulated = 0.0;

    for i in 1..route.len().saturating_sub(1) {
        accumulated += haversine_distance(route[i - 1], route[i]);

        if accumulated >= interval {
            let seq = checkpoints.len() + 1;
            checkpoints.push(Checkpoint::new(
                seq,
                format!("Checkpoint {}", seq),
                route[i],
                config.checkpoint_radius_m,
            ));
            accumulated = 0.0;
        }
    }

    checkpoints.push(Checkpoint::destination(
        checkpoints.len() + 1,
        last,
        config.checkpoint_radius_m,
    ));
    checkpoints
}

/// Active monitoring bookkeeping.
#[derive(Debug, Clone, Copy)]
struct Session {
    id: SessionId,
    started_at: SystemTime,
}

/// Owns the route and evaluates progress against it.
#[derive(Debug, Clone)]
pub struct RouteMonitor {
    config: MonitorConfig,

    /// `None` until a route is initialised
    mode: Option<RouteMode>,

    route: Vec<Coordinate>,

    checkpoints: Vec<Checkpoint>,

    /// Index of the checkpoint under evaluation; never decreases
    current_index: usize,

    latest_location: Option<Coordinate>,

    active: bool,

    session: Option<Session>,
}

impl RouteMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            mode: None,
            route: Vec::new(),
            checkpoints: Vec::new(),
            current_index: 0,
            latest_location: None,
            active: false,
            session: None,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Installs a new route.
    ///
    /// Any running session is stopped first. In automatic mode the generated
    /// checkpoints are returned; in manual mode the list starts empty.
    pub fn init_route(
        &mut self,
        polyline: Vec<Coordinate>,
        mode: RouteMode,
    ) -> Result<Vec<Checkpoint>, RouteError> {
        if mode == RouteMode::Automatic && polyline.len() < 2 {
            return Err(RouteError::InvalidRoute {
                reason: format!(
                    "automatic mode needs at least 2 points, got {}",
                    polyline.len()
                ),
            });
        }
        if let Some(index) = polyline.iter().position(|point| !point.is_valid()) {
            return Err(RouteError::InvalidRoute {
                reason: format!("point {} is not a valid coordinate", index),
            });
        }

        self.stop_monitoring();
        self.checkpoints = match mode {
            RouteMode::Automatic => generate_checkpoints(&polyline, &self.config),
            RouteMode::Manual => Vec::new(),
        };
        self.route = polyline;
        self.mode = Some(mode);
        self.current_index = 0;
        self.session = None;

        Ok(self.checkpoints.clone())
    }

    /// Appends a manual checkpoint. Its deadline is computed when monitoring
    /// starts.
    pub fn add_checkpoint(
        &mut self,
        position: Coordinate,
        name: Option<&str>,
    ) -> Result<Checkpoint, RouteError> {
        match self.mode {
            None => return Err(RouteError::NoRoute),
            Some(RouteMode::Automatic) => return Err(RouteError::AutomaticMode),
            Some(RouteMode::Manual) => {}
        }
        if self.active {
            return Err(RouteError::MonitoringActive);
        }
        if !position.is_valid() {
            return Err(RouteError::InvalidRoute {
                reason: format!("checkpoint position {} is not a valid coordinate", position),
            });
        }

        let seq = self.checkpoints.len() + 1;
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("Checkpoint {}", seq));
        let checkpoint = Checkpoint::new(seq, name, position, self.config.checkpoint_radius_m);
        self.checkpoints.push(checkpoint.clone());

        Ok(checkpoint)
    }

    /// Activates the session and (re)computes every deadline from `now`.
    ///
    /// Deadlines accumulate distance from `initial` to the first checkpoint,
    /// then checkpoint to checkpoint. Without an initial fix the first leg
    /// counts as zero.
    pub fn start_monitoring(
        &mut self,
        initial: Option<Coordinate>,
        now: SystemTime,
    ) -> Result<SessionId, RouteError> {
        if self.active {
            return Err(RouteError::MonitoringActive);
        }
        if self.current_checkpoint().is_none() {
            return Err(RouteError::NoCheckpoints);
        }

        if let Some(location) = initial {
            self.latest_location = Some(location);
        }
        self.schedule(initial, now);

        let session = Session {
            id: SessionId::new(),
            started_at: now,
        };
        self.session = Some(session);
        self.active = true;

        Ok(session.id)
    }

    fn schedule(&mut self, start_position: Option<Coordinate>, start: SystemTime) {
        let mut cumulative = 0.0;
        let mut previous = start_position;

        for checkpoint in &mut self.checkpoints {
            if let Some(prev) = previous {
                cumulative += haversine_distance(prev, checkpoint.position);
            }
            checkpoint.expected_arrival = self
                .config
                .travel_time(cumulative)
                .and_then(|budget| start.checked_add(budget));
            previous = Some(checkpoint.position);
        }
    }

    /// Records the latest fix. Evaluation happens on the next tick.
    pub fn update_location(&mut self, location: Coordinate) {
        self.latest_location = Some(location);
    }

    /// One evaluation tick.
    ///
    /// Reached is decided before Missed, so a fix inside the radius at the
    /// deadline counts as an arrival. Either outcome advances to the next
    /// checkpoint; settling the last one ends the session.
    pub fn check_progress(&mut self, now: SystemTime) -> Option<MonitorEvent> {
        if !self.active {
            return None;
        }
        let location = self.latest_location?;
        let index = self.current_index;
        let checkpoint = self.checkpoints.get_mut(index)?;

        if !checkpoint.is_pending() {
            return None;
        }

        let distance = haversine_distance(location, checkpoint.position);
        let event = if distance <= checkpoint.radius_m {
            checkpoint.mark_reached(now);
            MonitorEvent::Reached {
                checkpoint: checkpoint.clone(),
                index,
            }
        } else if checkpoint
            .expected_arrival
            .is_some_and(|deadline| now > deadline)
        {
            checkpoint.mark_missed(now);
            MonitorEvent::Missed {
                checkpoint: checkpoint.clone(),
                index,
            }
        } else {
            return None;
        };

        self.current_index += 1;
        if self.current_index >= self.checkpoints.len() {
            self.active = false;
        }

        Some(event)
    }

    /// Deactivates evaluation. Idempotent.
    pub fn stop_monitoring(&mut self) {
        self.active = false;
    }

    /// Back to the empty initial state.
    pub fn reset(&mut self) {
        self.stop_monitoring();
        self.mode = None;
        self.route.clear();
        self.checkpoints.clear();
        self.current_index = 0;
        self.latest_location = None;
        self.session = None;
    }

    pub fn current_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.get(self.current_index)
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn route(&self) -> &[Coordinate] {
        &self.route
    }

    pub fn mode(&self) -> Option<RouteMode> {
        self.mode
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn latest_location(&self) -> Option<Coordinate> {
        self.latest_location
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.map(|s| s.id)
    }

    pub fn started_at(&self) -> Option<SystemTime> {
        self.session.map(|s| s.started_at)
    }

    pub fn progress(&self) -> RouteProgress {
        let count = |status: CheckpointStatus| {
            self.checkpoints
                .iter()
                .filter(|c| c.status == status)
                .count()
        };
        RouteProgress {
            total: self.checkpoints.len(),
            reached: count(CheckpointStatus::Reached),
            missed: count(CheckpointStatus::Missed),
            pending: count(CheckpointStatus::Pending),
            current_index: self.current_index,
            active: self.active,
        }
    }
}

impl Default for RouteMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}
