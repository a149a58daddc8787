//! Scenario runner - executes scripted journeys against the real engines.

use crate::collaborators::{DeliveredAlert, SimAlertSender, SimContactBook, SimLocationFeed};
use crate::context::SimContext;
use crate::exporter::{SimEvent, SimExport, SimFrame};
use crate::scenarios::ScenarioId;
use crate::traveller::Traveller;

use safepath_core::geodesy::equatorial_degrees;
use safepath_core::{
    EscalationPhase, Guardian, GuardianConfig, GuardianEvent, RouteError, RouteMode, TimerMode,
};
use safepath_env::Coordinate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type SimGuardian = Guardian<SimContext, SimContactBook, SimAlertSender>;

/// Errors that prevent a scenario from running at all.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("route setup failed: {0}")]
    Route(#[from] RouteError),
}

/// Reads a guardian config from a JSON file.
pub fn load_config(path: &str) -> Result<GuardianConfig, SimError> {
    let json = std::fs::read_to_string(path)?;
    Ok(GuardianConfig::from_json(&json)?)
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed (one tick per simulated second)
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    /// Checkpoints generated for the route
    pub checkpoints_total: usize,

    pub checkpoints_reached: usize,

    pub checkpoints_missed: usize,

    /// The last checkpoint was settled
    pub route_completed: bool,

    /// Countdowns started
    pub escalations_started: u64,

    /// Countdowns the user cancelled
    pub escalations_cancelled: u64,

    /// Countdown seconds observed
    pub countdown_ticks: u64,

    pub alerts_sent: u64,

    pub alerts_failed: u64,

    /// Location provider failures surfaced
    pub location_errors: u64,

    /// Time of the first delivered alert (seconds)
    pub first_alert_secs: Option<f64>,
}

impl ScenarioMetrics {
    fn record(&mut self, event: &GuardianEvent, tick: u64) {
        match event {
            GuardianEvent::CheckpointReached { .. } => self.checkpoints_reached += 1,
            GuardianEvent::CheckpointMissed { .. } => self.checkpoints_missed += 1,
            GuardianEvent::RouteCompleted { .. } => self.route_completed = true,
            GuardianEvent::EscalationStarted { .. } => self.escalations_started += 1,
            GuardianEvent::CountdownTick { .. } => self.countdown_ticks += 1,
            GuardianEvent::EscalationCancelled => self.escalations_cancelled += 1,
            GuardianEvent::AlertSent { .. } => {
                self.alerts_sent += 1;
                self.first_alert_secs.get_or_insert(tick as f64);
            }
            GuardianEvent::AlertFailed { .. } => self.alerts_failed += 1,
            GuardianEvent::LocationError { .. } => self.location_errors += 1,
        }
    }
}

/// What the simulated user and world do during a journey.
#[derive(Debug, Clone)]
struct Journey {
    speed_kmh: f64,
    stall_at_m: Option<f64>,
    contacts: SimContactBook,
    /// Answer every countdown with "I'm safe" after this many seconds
    cancel_after_secs: Option<u64>,
    sos_at_secs: Option<u64>,
    /// Gateway offline from the start until this second
    outage_until_secs: Option<u64>,
    deny_location: bool,
}

impl Default for Journey {
    fn default() -> Self {
        Self {
            speed_kmh: 45.0,
            stall_at_m: None,
            contacts: SimContactBook::family(),
            cancel_after_secs: None,
            sos_at_secs: None,
            outage_until_secs: None,
            deny_location: false,
        }
    }
}

impl Journey {
    fn for_scenario(scenario: ScenarioId) -> Self {
        let stalled = Self {
            stall_at_m: Some(1_500.0),
            ..Self::default()
        };
        match scenario {
            ScenarioId::OnSchedule => Self::default(),
            ScenarioId::Stalled => stalled,
            ScenarioId::ImSafe => Self {
                cancel_after_secs: Some(10),
                ..stalled
            },
            ScenarioId::NoContacts => Self {
                contacts: SimContactBook::default(),
                ..stalled
            },
            ScenarioId::SosButton => Self {
                sos_at_secs: Some(60),
                ..Self::default()
            },
            ScenarioId::SenderOutage => Self {
                outage_until_secs: Some(450),
                ..stalled
            },
            ScenarioId::PermissionDenied => Self {
                deny_location: true,
                ..Self::default()
            },
        }
    }
}

/// Everything a finished journey leaves behind.
struct Run {
    ticks: u64,
    metrics: ScenarioMetrics,
    delivered: Vec<DeliveredAlert>,
    final_phase: EscalationPhase,
    export: SimExport,
}

/// The user's side of the event stream.
#[derive(Default)]
struct Observer {
    metrics: ScenarioMetrics,
    countdown_started: Option<u64>,
    pending: Vec<SimEvent>,
}

impl Observer {
    fn drain(&mut self, events: &mut mpsc::UnboundedReceiver<GuardianEvent>, tick: u64) {
        while let Ok(event) = events.try_recv() {
            debug!(tick, ?event, "guardian event");
            self.metrics.record(&event, tick);
            match &event {
                GuardianEvent::EscalationStarted { .. } => self.countdown_started = Some(tick),
                GuardianEvent::EscalationCancelled
                | GuardianEvent::AlertSent { .. }
                | GuardianEvent::AlertFailed { .. } => self.countdown_started = None,
                _ => {}
            }
            self.pending.push(SimEvent::from(&event));
        }
    }
}

/// A 6 km route heading north from central New Delhi, one vertex per km.
pub fn planned_route() -> Vec<Coordinate> {
    (0..=6u32)
        .map(|km| Coordinate::new(28.6139 + equatorial_degrees(f64::from(km) * 1_000.0), 77.2090))
        .collect()
}

/// Runs scripted journeys.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Engine configuration (timers are always stepped)
    config: GuardianConfig,

    /// Maximum duration in seconds
    max_duration_secs: f64,

    /// Export a frame every N ticks
    export_interval: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            config: GuardianConfig::default(),
            max_duration_secs: 900.0,
            export_interval: 5,
        }
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Replaces the engine configuration.
    pub fn with_config(mut self, config: GuardianConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_with_export(scenario).0
    }

    /// Runs a scenario and returns the result with its frame-by-frame export.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let journey = Journey::for_scenario(scenario);
        let outcome = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(SimError::from)
            .and_then(|runtime| runtime.block_on(self.simulate(scenario, &journey)));

        let mut run = match outcome {
            Ok(run) => run,
            Err(e) => {
                warn!("Scenario {} could not run: {}", scenario.name(), e);
                let result = ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    total_ticks: 0,
                    final_time_secs: 0.0,
                    failure_reason: Some(e.to_string()),
                    metrics: ScenarioMetrics::default(),
                };
                return (result, SimExport::new(scenario.name(), self.seed));
            }
        };

        let verdict = judge(scenario, &journey, &self.config, &run);
        let passed = verdict.is_ok();
        run.export.finalize(passed, run.delivered.len());

        let m = &run.metrics;
        info!(
            "{} complete: {}/{} reached, {} missed, {} escalations, {} cancelled, {} alerts sent, {} failed",
            scenario.name(),
            m.checkpoints_reached,
            m.checkpoints_total,
            m.checkpoints_missed,
            m.escalations_started,
            m.escalations_cancelled,
            m.alerts_sent,
            m.alerts_failed
        );

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: run.ticks,
            final_time_secs: run.ticks as f64,
            failure_reason: verdict.err(),
            metrics: run.metrics,
        };
        (result, run.export)
    }

    async fn simulate(&self, scenario: ScenarioId, journey: &Journey) -> Result<Run, SimError> {
        // Setup
        let context_seed = self.seed;
        let physics_seed = self.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let context = SimContext::shared(context_seed);

        let route = planned_route();
        let mut traveller = Traveller::new(route.clone(), journey.speed_kmh, physics_seed);
        if let Some(distance) = journey.stall_at_m {
            traveller = traveller.stall_at(distance);
        }
        let feed = SimLocationFeed::new(Arc::clone(&context), traveller);
        if journey.deny_location {
            feed.deny_permission();
        }

        let sender = Arc::new(SimAlertSender::new(Arc::clone(&context)));
        sender.set_outage(journey.outage_until_secs.is_some());

        let config = GuardianConfig {
            timers: TimerMode::Stepped,
            ..self.config.clone()
        };
        let evaluation_every = config.monitor.evaluation_interval().as_secs();
        let (guardian, mut events): (SimGuardian, _) = Guardian::new(
            Arc::clone(&context),
            Arc::new(journey.contacts.clone()),
            Arc::clone(&sender),
            config,
        );

        let checkpoints = guardian.init_route(route.clone(), RouteMode::Automatic)?;
        let initial = guardian.locate(&feed).await.ok();
        guardian.start_monitoring(initial)?;

        let mut export = SimExport::new(scenario.name(), self.seed);
        export.set_plan(&route, &checkpoints);

        let mut observer = Observer::default();
        observer.metrics.checkpoints_total = checkpoints.len();

        let target_ticks = self.max_duration_secs.max(0.0) as u64;

        // Run simulation, one tick per second
        for tick in 1..=target_ticks {
            context.advance_time(Duration::from_secs(1));
            feed.advance(1.0);

            if journey.outage_until_secs == Some(tick) {
                info!("  t={}s | SMS gateway back online", tick);
                sender.set_outage(false);
            }

            // Failures surface as LocationError events
            let _ = guardian.locate(&feed).await;

            // The countdown ticks before evaluation so a fresh escalation
            // gets its full duration
            guardian.countdown_tick().await;
            if tick % evaluation_every == 0 {
                guardian.evaluate().await;
            }

            if journey.sos_at_secs == Some(tick) {
                info!("  t={}s | SOS button pressed", tick);
                let _ = guardian.sos_button().await;
            }

            observer.drain(&mut events, tick);

            if let (Some(after), Some(started)) =
                (journey.cancel_after_secs, observer.countdown_started)
            {
                if tick.saturating_sub(started) >= after && guardian.cancel() {
                    info!("  t={}s | user tapped \"I'm safe\"", tick);
                    observer.drain(&mut events, tick);
                }
            }

            if tick % self.export_interval == 0 || !observer.pending.is_empty() {
                export.add_frame(frame(&guardian, &feed, tick, &mut observer));
            }

            // Progress log every minute
            if tick % 60 == 0 {
                let progress = guardian.progress();
                debug!(
                    "  t={}s | travelled={:.0}m | checkpoint={}/{} | phase={:?}",
                    tick,
                    feed.travelled(),
                    progress.current_index,
                    progress.total,
                    guardian.escalation_state().phase
                );
            }
        }

        guardian.stop_monitoring();
        Ok(Run {
            ticks: target_ticks,
            metrics: observer.metrics,
            delivered: sender.delivered(),
            final_phase: guardian.escalation_state().phase,
            export,
        })
    }
}

fn frame(guardian: &SimGuardian, feed: &SimLocationFeed, tick: u64, observer: &mut Observer) -> SimFrame {
    let state = guardian.escalation_state();
    SimFrame {
        time_sec: tick as f64,
        truth: feed.true_position().map(Into::into),
        current_checkpoint: guardian
            .is_monitoring()
            .then(|| guardian.progress().current_index),
        phase: format!("{:?}", state.phase),
        remaining_seconds: state.remaining_seconds,
        events: std::mem::take(&mut observer.pending),
    }
}

fn expect(condition: bool, reason: impl FnOnce() -> String) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(reason())
    }
}

/// Scenario assertions.
fn judge(
    scenario: ScenarioId,
    journey: &Journey,
    config: &GuardianConfig,
    run: &Run,
) -> Result<(), String> {
    let m = &run.metrics;
    let sent = run.delivered.len();

    expect(m.checkpoints_total > 0, || "route produced no checkpoints".to_string())?;

    match scenario {
        ScenarioId::OnSchedule => {
            expect(m.checkpoints_reached == m.checkpoints_total, || {
                format!("reached {}/{} checkpoints", m.checkpoints_reached, m.checkpoints_total)
            })?;
            expect(m.route_completed, || "route never completed".to_string())?;
            expect(sent == 0, || format!("{} alerts sent on an on-time journey", sent))
        }
        ScenarioId::Stalled => {
            expect(m.checkpoints_missed == m.checkpoints_total, || {
                format!("missed {}/{} checkpoints", m.checkpoints_missed, m.checkpoints_total)
            })?;
            expect(m.checkpoints_reached == 0, || "a stalled traveller reached a checkpoint".to_string())?;
            expect(m.route_completed, || "route never completed".to_string())?;
            expect(sent >= 1, || "no alert delivered".to_string())?;
            expect(
                run.delivered[0].alert.body.contains("Missed Safety Checkpoint!"),
                || "first alert does not name the missed checkpoint".to_string(),
            )
        }
        ScenarioId::ImSafe => {
            expect(m.escalations_started >= 1, || "no escalation started".to_string())?;
            expect(m.escalations_cancelled == m.escalations_started, || {
                format!(
                    "{} of {} escalations cancelled",
                    m.escalations_cancelled, m.escalations_started
                )
            })?;
            expect(sent == 0, || format!("{} alerts sent despite \"I'm safe\"", sent))
        }
        ScenarioId::NoContacts => {
            expect(m.checkpoints_missed >= 1, || "no checkpoint missed".to_string())?;
            expect(m.escalations_started == 0, || "countdown started without contacts".to_string())?;
            expect(m.alerts_failed == m.checkpoints_missed as u64, || {
                format!("{} failures for {} misses", m.alerts_failed, m.checkpoints_missed)
            })?;
            expect(run.final_phase == EscalationPhase::Idle, || {
                format!("controller left in {:?}", run.final_phase)
            })?;
            expect(sent == 0, || format!("{} alerts sent without contacts", sent))
        }
        ScenarioId::SosButton => {
            let pressed = journey.sos_at_secs.unwrap_or_default();
            let due = (pressed + u64::from(config.escalation.sos_button_countdown_secs)) as f64;
            expect(sent == 1, || format!("{} alerts sent, expected 1", sent))?;
            expect(m.first_alert_secs == Some(due), || {
                format!("alert at {:?}s, expected {}s", m.first_alert_secs, due)
            })?;
            expect(
                run.delivered[0].alert.body.contains("I need immediate help!")
                    && run.delivered[0].alert.location.is_some(),
                || "SOS alert lacks the manual message or location".to_string(),
            )?;
            expect(m.checkpoints_reached == m.checkpoints_total, || {
                format!("reached {}/{} checkpoints", m.checkpoints_reached, m.checkpoints_total)
            })
        }
        ScenarioId::SenderOutage => {
            expect(m.alerts_failed >= 1, || "no failure surfaced during the outage".to_string())?;
            expect(sent >= 1, || "nothing delivered after the gateway recovered".to_string())?;
            expect(run.final_phase != EscalationPhase::CountingDown, || {
                "escalation stuck counting down".to_string()
            })
        }
        ScenarioId::PermissionDenied => {
            expect(m.location_errors >= run.ticks, || {
                format!("{} location errors over {} ticks", m.location_errors, run.ticks)
            })?;
            expect(m.checkpoints_reached + m.checkpoints_missed == 0, || {
                "checkpoints evaluated without a location".to_string()
            })?;
            expect(sent == 0 && m.escalations_started == 0, || "alert without a location".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safepath_core::haversine_distance;

    #[test]
    fn test_planned_route_is_six_km() {
        let route = planned_route();
        assert_eq!(route.len(), 7);
        let total: f64 = route
            .windows(2)
            .map(|pair| haversine_distance(pair[0], pair[1]))
            .sum();
        assert!((total - 6_000.0).abs() < 1e-3, "got {total}");
    }

    #[test]
    fn test_every_scenario_passes() {
        let runner = ScenarioRunner::new(42);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} failed: {:?} ({:?})",
                scenario,
                result.failure_reason,
                result.metrics
            );
        }
    }

    #[test]
    fn test_stalled_metrics() {
        let result = ScenarioRunner::new(7).run(ScenarioId::Stalled);
        assert_eq!(result.total_ticks, 900);
        assert_eq!(result.metrics.checkpoints_total, 3);
        assert_eq!(result.metrics.checkpoints_missed, 3);
        assert_eq!(result.metrics.escalations_started, 3);
        assert_eq!(result.metrics.alerts_sent, 3);
        // First deadline is about 180 s, caught by the next 5 s evaluation,
        // then a 30 s countdown
        let first = result.metrics.first_alert_secs.unwrap();
        assert!((210.0..=215.0).contains(&first), "got {first}");
    }

    #[test]
    fn test_sender_outage_recovers() {
        let result = ScenarioRunner::new(3).run(ScenarioId::SenderOutage);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.alerts_failed, 2);
        assert_eq!(result.metrics.alerts_sent, 1);
    }

    #[test]
    fn test_same_seed_same_run() {
        let a = ScenarioRunner::new(11).run(ScenarioId::ImSafe);
        let b = ScenarioRunner::new(11).run(ScenarioId::ImSafe);
        assert_eq!(a.metrics, b.metrics);
    }

    #[test]
    fn test_config_changes_countdown() {
        let mut config = GuardianConfig::default();
        config.escalation.sos_button_countdown_secs = 10;

        let result = ScenarioRunner::new(42)
            .with_config(config)
            .run(ScenarioId::SosButton);
        // Pressed at 60 s with a 10 s countdown
        assert_eq!(result.metrics.first_alert_secs, Some(70.0));
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn test_export_has_frames() {
        let (result, export) = ScenarioRunner::new(42)
            .with_duration(120.0)
            .run_with_export(ScenarioId::SosButton);
        // Too short to finish the route
        assert!(!result.passed);
        assert_eq!(result.total_ticks, 120);
        assert_eq!(export.checkpoints.len(), 3);
        assert_eq!(export.route.len(), 7);
        assert!(export.frames.len() >= 24);
        assert_eq!(export.duration_sec, 120.0);
        assert_eq!(export.alerts_delivered, 1);
    }
}
