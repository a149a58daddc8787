//! JSON exporter for journey replays.
//!
//! Exports simulation frames as JSON so a run can be plotted or diffed
//! between seeds.

use safepath_core::{Checkpoint, GuardianEvent};
use safepath_env::{Coordinate, SessionId};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use uuid::Uuid;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Ground truth traveller position
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truth: Option<Position>,

    /// Index of the checkpoint being watched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_checkpoint: Option<usize>,

    /// Escalation phase, as shown to the user
    pub phase: String,

    /// Countdown seconds left (0 when idle)
    pub remaining_seconds: u32,

    /// Guardian events since the previous frame
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// Latitude/longitude pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl From<Coordinate> for Position {
    fn from(coordinate: Coordinate) -> Self {
        Self {
            lat: coordinate.latitude,
            lng: coordinate.longitude,
        }
    }
}

/// Planned checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMarker {
    pub id: String,
    pub name: String,
    pub position: Position,
    pub radius_m: f64,
}

impl From<&Checkpoint> for CheckpointMarker {
    fn from(checkpoint: &Checkpoint) -> Self {
        Self {
            id: checkpoint.id.clone(),
            name: checkpoint.name.clone(),
            position: checkpoint.position.into(),
            radius_m: checkpoint.radius_m,
        }
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl From<&GuardianEvent> for SimEvent {
    fn from(event: &GuardianEvent) -> Self {
        let (message, level) = match event {
            GuardianEvent::CheckpointReached { checkpoint, .. } => {
                (format!("reached {}", checkpoint.name), None)
            }
            GuardianEvent::CheckpointMissed { checkpoint, .. } => {
                (format!("missed {}", checkpoint.name), Some("warn"))
            }
            GuardianEvent::RouteCompleted { progress } => (
                format!(
                    "route completed: {} reached, {} missed",
                    progress.reached, progress.missed
                ),
                None,
            ),
            GuardianEvent::EscalationStarted {
                trigger,
                remaining_seconds,
            } => (
                format!("{} escalation, {} s countdown", trigger.label(), remaining_seconds),
                Some("warn"),
            ),
            GuardianEvent::CountdownTick {
                remaining_seconds, ..
            } => (format!("countdown {}", remaining_seconds), None),
            GuardianEvent::EscalationCancelled => ("cancelled: I'm safe".to_string(), None),
            GuardianEvent::AlertSent { delivered, .. } => {
                (format!("alert sent to {} contacts", delivered), Some("error"))
            }
            GuardianEvent::AlertFailed { error } => {
                (format!("alert failed: {}", error), Some("error"))
            }
            GuardianEvent::LocationError { error } => {
                (format!("location error: {}", error), Some("warn"))
            }
        };
        Self {
            message,
            level: level.map(str::to_string),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Stable id for this (scenario, seed) pair
    pub run_id: Uuid,

    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// Planned route
    pub route: Vec<Position>,

    /// Checkpoints as generated at route setup
    pub checkpoints: Vec<CheckpointMarker>,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    /// Alerts the gateway delivered
    pub alerts_delivered: usize,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            run_id: SessionId::from_seed(seed ^ fnv1a(scenario)).as_uuid(),
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            route: Vec::new(),
            checkpoints: Vec::new(),
            frames: Vec::new(),
            passed: false,
            alerts_delivered: 0,
        }
    }

    /// Records the planned route and its checkpoints.
    pub fn set_plan(&mut self, route: &[Coordinate], checkpoints: &[Checkpoint]) {
        self.route = route.iter().copied().map(Position::from).collect();
        self.checkpoints = checkpoints.iter().map(CheckpointMarker::from).collect();
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, alerts_delivered: usize) {
        self.passed = passed;
        self.alerts_delivered = alerts_delivered;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf29ce484222325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x100000001b3)
    })
}
