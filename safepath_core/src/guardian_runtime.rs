//! Guardian Runtime - Orchestrates the route and escalation engines with
//! environment context.
//!
//! This module provides the integration layer between the pure engines
//! (route monitor, escalation controller) and the environment abstraction
//! (GuardianContext plus the collaborators).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Guardian                             │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │              Context: GuardianContext                │   │
//! │  │  • system_time() → deadlines, alert timestamps       │   │
//! │  │  • sleep() → 5 s evaluation / 1 s countdown timers   │   │
//! │  │  • spawn() → timer and location-feed tasks           │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                              │                              │
//! │  ┌──────────────┐   Missed   ┌──────────────┐  Dispatch     │
//! │  │    ROUTE     │ ─────────► │  ESCALATION  │ ──────────►   │
//! │  │   Monitor    │            │  Controller  │  AlertSender  │
//! │  └──────────────┘            └──────────────┘               │
//! │          │                          │                       │
//! │          └──────── GuardianEvent channel ───────► UI        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use safepath_core::guardian_runtime::{Guardian, GuardianConfig};
//! use safepath_core::RouteMode;
//! use safepath_env::TokioContext;
//!
//! let (guardian, mut events) = Guardian::new(
//!     TokioContext::shared(), contacts, sender, GuardianConfig::default(),
//! );
//! guardian.init_route(polyline, RouteMode::Automatic)?;
//! guardian.start_monitoring(Some(here))?;
//!
//! while let Some(event) = events.recv().await {
//!     render(event);
//! }
//! ```

use crate::alert_message::{compose_alert, compose_location_share};
use crate::escalation::{
    Countdown, Dispatch, EscalationConfig, EscalationController, EscalationError,
    EscalationPhase, EscalationState, TickOutcome, Trigger,
};
use crate::route_monitor::{
    Checkpoint, MonitorConfig, MonitorEvent, RouteError, RouteMode, RouteMonitor, RouteProgress,
};
use safepath_env::{
    AlertSender, Contact, ContactStore, Coordinate, EnvError, GuardianContext, LocationProvider,
    LocationSample, OutboundAlert, SendReceipt, SessionId,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Who drives the periodic timers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    /// The guardian spawns its own evaluation and countdown loops
    #[default]
    Spawned,
    /// An external driver calls `evaluate()` and `countdown_tick()`
    Stepped,
}

/// Configuration for a guardian.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    pub monitor: MonitorConfig,
    pub escalation: EscalationConfig,
    pub timers: TimerMode,
}

impl GuardianConfig {
    /// Parses a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Everything the UI layer gets to observe.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardianEvent {
    CheckpointReached { checkpoint: Checkpoint, index: usize },
    CheckpointMissed { checkpoint: Checkpoint, index: usize },
    RouteCompleted { progress: RouteProgress },
    EscalationStarted { trigger: Trigger, remaining_seconds: u32 },
    CountdownTick { remaining_seconds: u32, urgent: bool },
    EscalationCancelled,
    AlertSent { trigger: Trigger, delivered: usize },
    AlertFailed { error: EscalationError },
    LocationError { error: EnvError },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancellation handle for one spawned timer loop.
///
/// Each arm is tagged with a generation so that a stale stop request cannot
/// reach a loop armed after it.
#[derive(Clone, Default)]
struct TimerSlot(Arc<Mutex<Option<(u64, watch::Sender<bool>)>>>);

impl TimerSlot {
    /// Installs a fresh stop signal, stopping whichever loop held the slot.
    fn arm(&self, generation: u64) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        let previous = lock(&self.0).replace((generation, tx));
        if let Some((_, previous)) = previous {
            let _ = previous.send(true);
        }
        rx
    }

    /// Stops the current loop, whatever its generation.
    fn disarm(&self) {
        let current = lock(&self.0).take();
        if let Some((_, current)) = current {
            let _ = current.send(true);
        }
    }

    /// Stops the loop only if it was armed for `generation`.
    fn disarm_generation(&self, generation: u64) {
        let current = {
            let mut slot = lock(&self.0);
            match slot.as_ref() {
                Some((armed, _)) if *armed == generation => slot.take(),
                _ => None,
            }
        };
        if let Some((_, current)) = current {
            let _ = current.send(true);
        }
    }
}

/// A guardian watching over one user.
///
/// Generic over the context and collaborator implementations, allowing the
/// same code to run in production (tokio) or simulation (virtual clock).
/// Cloning is cheap and every clone drives the same engines.
pub struct Guardian<Ctx, Book, Tx>
where
    Ctx: GuardianContext,
    Book: ContactStore,
    Tx: AlertSender,
{
    context: Arc<Ctx>,
    contacts: Arc<Book>,
    sender: Arc<Tx>,
    config: Arc<GuardianConfig>,
    monitor: Arc<Mutex<RouteMonitor>>,
    escalation: Arc<Mutex<EscalationController>>,
    events: mpsc::UnboundedSender<GuardianEvent>,
    evaluation_timer: TimerSlot,
    countdown_timer: TimerSlot,
}

impl<Ctx, Book, Tx> Clone for Guardian<Ctx, Book, Tx>
where
    Ctx: GuardianContext,
    Book: ContactStore,
    Tx: AlertSender,
{
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            contacts: Arc::clone(&self.contacts),
            sender: Arc::clone(&self.sender),
            config: Arc::clone(&self.config),
            monitor: Arc::clone(&self.monitor),
            escalation: Arc::clone(&self.escalation),
            events: self.events.clone(),
            evaluation_timer: self.evaluation_timer.clone(),
            countdown_timer: self.countdown_timer.clone(),
        }
    }
}

impl<Ctx, Book, Tx> Guardian<Ctx, Book, Tx>
where
    Ctx: GuardianContext,
    Book: ContactStore,
    Tx: AlertSender,
{
    /// Creates a guardian and the receiving end of its event stream.
    pub fn new(
        context: Arc<Ctx>,
        contacts: Arc<Book>,
        sender: Arc<Tx>,
        config: GuardianConfig,
    ) -> (Self, mpsc::UnboundedReceiver<GuardianEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let guardian = Self {
            context,
            monitor: Arc::new(Mutex::new(RouteMonitor::new(config.monitor.clone()))),
            escalation: Arc::new(Mutex::new(EscalationController::new(
                config.escalation.clone(),
            ))),
            contacts,
            sender,
            config: Arc::new(config),
            events,
            evaluation_timer: TimerSlot::default(),
            countdown_timer: TimerSlot::default(),
        };
        (guardian, rx)
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.context
    }

    fn emit(&self, event: GuardianEvent) {
        // Nobody listening is not an error
        let _ = self.events.send(event);
    }

    // ───────────────────────────── route ─────────────────────────────

    pub fn init_route(
        &self,
        polyline: Vec<Coordinate>,
        mode: RouteMode,
    ) -> Result<Vec<Checkpoint>, RouteError> {
        let checkpoints = {
            let mut monitor = lock(&self.monitor);
            monitor.init_route(polyline, mode)?
        };
        self.evaluation_timer.disarm();
        info!(?mode, checkpoints = checkpoints.len(), "route initialised");
        Ok(checkpoints)
    }

    pub fn add_checkpoint(
        &self,
        position: Coordinate,
        name: Option<&str>,
    ) -> Result<Checkpoint, RouteError> {
        let mut monitor = lock(&self.monitor);
        monitor.add_checkpoint(position, name)
    }

    /// Starts a monitoring session from `initial` and, in spawned mode,
    /// schedules evaluation every `evaluation_interval_secs`.
    pub fn start_monitoring(&self, initial: Option<Coordinate>) -> Result<SessionId, RouteError> {
        let now = self.context.system_time();
        let session = {
            let mut monitor = lock(&self.monitor);
            monitor.start_monitoring(initial, now)?
        };
        if let Some(location) = initial {
            let mut escalation = lock(&self.escalation);
            escalation.update_location(location);
        }

        info!(%session, "monitoring started");
        if self.config.timers == TimerMode::Spawned {
            self.spawn_evaluation_loop();
        }
        Ok(session)
    }

    /// Stops evaluation immediately. Idempotent.
    pub fn stop_monitoring(&self) {
        self.evaluation_timer.disarm();
        let mut monitor = lock(&self.monitor);
        if monitor.is_active() {
            debug!("monitoring stopped");
        }
        monitor.stop_monitoring();
    }

    /// Stops monitoring and discards the route along with the last fix.
    pub fn reset(&self) {
        self.evaluation_timer.disarm();
        {
            let mut monitor = lock(&self.monitor);
            monitor.reset();
        }
        let mut escalation = lock(&self.escalation);
        escalation.forget_location();
    }

    fn spawn_evaluation_loop(&self) {
        let mut stop = self.evaluation_timer.arm(0);
        let interval = self.config.monitor.evaluation_interval();
        let guardian = self.clone();

        self.context.spawn("route-evaluation", async move {
            loop {
                tokio::select! {
                    _ = guardian.context.sleep(interval) => {}
                    _ = stop.changed() => break,
                }
                guardian.evaluate().await;
                if !guardian.is_monitoring() {
                    break;
                }
            }
            debug!("evaluation loop exited");
        });
    }

    /// One evaluation tick against the latest location.
    ///
    /// A missed checkpoint escalates with the modal countdown; settling the
    /// last checkpoint completes the route.
    pub async fn evaluate(&self) -> Option<MonitorEvent> {
        let now = self.context.system_time();
        let (event, completed) = {
            let mut monitor = lock(&self.monitor);
            let event = monitor.check_progress(now);
            let completed = event.is_some() && !monitor.is_active();
            (event, completed.then(|| monitor.progress()))
        };
        let event = event?;

        match &event {
            MonitorEvent::Reached { checkpoint, index } => {
                info!(checkpoint = %checkpoint.name, index, "checkpoint reached");
                self.emit(GuardianEvent::CheckpointReached {
                    checkpoint: checkpoint.clone(),
                    index: *index,
                });
            }
            MonitorEvent::Missed { checkpoint, index } => {
                warn!(checkpoint = %checkpoint.name, index, "checkpoint missed");
                self.emit(GuardianEvent::CheckpointMissed {
                    checkpoint: checkpoint.clone(),
                    index: *index,
                });
                let trigger = Trigger::CheckpointMissed(checkpoint.snapshot());
                // Failures were already surfaced as events
                let _ = self.escalate(trigger, Countdown::Modal).await;
            }
        }

        if let Some(progress) = completed {
            info!(
                reached = progress.reached,
                missed = progress.missed,
                "route completed"
            );
            self.evaluation_timer.disarm();
            self.emit(GuardianEvent::RouteCompleted { progress });
        }

        Some(event)
    }

    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        lock(&self.monitor).checkpoints().to_vec()
    }

    pub fn current_checkpoint(&self) -> Option<Checkpoint> {
        lock(&self.monitor).current_checkpoint().cloned()
    }

    pub fn progress(&self) -> RouteProgress {
        lock(&self.monitor).progress()
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.monitor).is_active()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        lock(&self.monitor).session_id()
    }

    // ──────────────────────────── location ───────────────────────────

    /// Records the latest fix for both engines.
    pub fn update_location(&self, location: Coordinate) {
        {
            let mut monitor = lock(&self.monitor);
            monitor.update_location(location);
        }
        let mut escalation = lock(&self.escalation);
        escalation.update_location(location);
    }

    /// Feeds one provider result in. Errors are surfaced, never fatal.
    pub fn ingest(&self, sample: Result<LocationSample, EnvError>) {
        match sample {
            Ok(fix) => self.update_location(fix.coordinate),
            Err(error) => {
                warn!(%error, "location provider failed");
                self.emit(GuardianEvent::LocationError { error });
            }
        }
    }

    /// Fetches a single fix and records it. A provider that does not answer
    /// within `location_timeout_secs` yields `EnvError::Timeout`.
    pub async fn locate<Loc: LocationProvider>(
        &self,
        provider: &Loc,
    ) -> Result<Coordinate, EnvError> {
        let timeout = self.config.monitor.location_timeout();
        let sample = tokio::select! {
            biased;
            sample = provider.current_location() => sample,
            _ = self.context.sleep(timeout) => {
                let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                Err(EnvError::Timeout(millis))
            }
        };
        let coordinate = sample.as_ref().map(|fix| fix.coordinate).map_err(|error| error.clone());
        self.ingest(sample);
        coordinate
    }

    /// Consumes the provider's subscription until it closes.
    pub fn follow<Loc: LocationProvider>(&self, provider: Arc<Loc>) {
        let guardian = self.clone();
        self.context.spawn("location-feed", async move {
            while let Some(sample) = provider.next_sample().await {
                guardian.ingest(sample);
            }
            debug!("location feed closed");
        });
    }

    // ─────────────────────────── escalation ──────────────────────────

    /// Safety-check escalation started by the user (30 s by default).
    pub async fn trigger_manual(&self) -> Result<bool, EscalationError> {
        self.escalate(Trigger::Manual, Countdown::Modal).await
    }

    /// Direct SOS button (3 s by default).
    pub async fn sos_button(&self) -> Result<bool, EscalationError> {
        self.escalate(Trigger::Manual, Countdown::SosButton).await
    }

    /// Starts an escalation unless one is already in progress.
    ///
    /// Returns `Ok(false)` when ignored. Escalating without any reachable
    /// contact fails up front with `NoContacts` and leaves the controller idle.
    pub async fn escalate(
        &self,
        trigger: Trigger,
        countdown: Countdown,
    ) -> Result<bool, EscalationError> {
        let ready = { lock(&self.escalation).is_ready() };
        if !ready {
            debug!(trigger = trigger.label(), "escalation already in progress");
            return Ok(false);
        }

        if let Err(error) = self.recipients().await {
            warn!(%error, trigger = trigger.label(), "escalation rejected");
            self.emit(GuardianEvent::AlertFailed {
                error: error.clone(),
            });
            return Err(error);
        }

        let spawned = self.config.timers == TimerMode::Spawned;
        let started = {
            let mut escalation = lock(&self.escalation);
            if escalation.trigger(None, trigger.clone(), countdown) {
                // Armed under the lock so arms follow trigger order
                let generation = escalation.escalation_count();
                let stop = spawned.then(|| self.countdown_timer.arm(generation));
                Some((escalation.remaining_seconds(), stop))
            } else {
                None
            }
        };
        let Some((remaining_seconds, stop)) = started else {
            return Ok(false);
        };

        warn!(trigger = trigger.label(), remaining_seconds, "escalation started");
        self.emit(GuardianEvent::EscalationStarted {
            trigger,
            remaining_seconds,
        });
        if let Some(stop) = stop {
            self.spawn_countdown_loop(stop);
        }
        Ok(true)
    }

    fn spawn_countdown_loop(&self, mut stop: watch::Receiver<bool>) {
        let guardian = self.clone();

        self.context.spawn("escalation-countdown", async move {
            loop {
                tokio::select! {
                    _ = guardian.context.sleep(Duration::from_secs(1)) => {}
                    _ = stop.changed() => break,
                }
                if guardian.countdown_tick().await.is_some() {
                    break;
                }
                if guardian.escalation_state().phase != EscalationPhase::CountingDown {
                    break;
                }
            }
            debug!("countdown loop exited");
        });
    }

    /// One countdown second. Returns the delivery result when the countdown
    /// expired on this tick.
    pub async fn countdown_tick(&self) -> Option<Result<SendReceipt, EscalationError>> {
        let outcome = {
            let mut escalation = lock(&self.escalation);
            let outcome = escalation.tick();
            if let TickOutcome::Fire(dispatch) = &outcome {
                self.countdown_timer.disarm_generation(dispatch.escalation);
            }
            outcome
        };

        match outcome {
            TickOutcome::Idle => None,
            TickOutcome::Counting {
                remaining_seconds,
                urgent,
            } => {
                debug!(remaining_seconds, urgent, "countdown");
                self.emit(GuardianEvent::CountdownTick {
                    remaining_seconds,
                    urgent,
                });
                None
            }
            TickOutcome::Fire(dispatch) => Some(self.dispatch(dispatch).await),
        }
    }

    /// "I'm safe". Returns false when there was no countdown to cancel.
    pub fn cancel(&self) -> bool {
        let cancelled = {
            let mut escalation = lock(&self.escalation);
            let cancelled = escalation.cancel();
            if cancelled {
                let generation = escalation.escalation_count();
                self.countdown_timer.disarm_generation(generation);
            }
            cancelled
        };
        if cancelled {
            info!("escalation cancelled by user");
            self.emit(GuardianEvent::EscalationCancelled);
        }
        cancelled
    }

    /// Sends the pending alert without waiting for the countdown.
    pub async fn send_now(&self) -> Option<Result<SendReceipt, EscalationError>> {
        let dispatch = {
            let mut escalation = lock(&self.escalation);
            let dispatch = escalation.send_now()?;
            self.countdown_timer.disarm_generation(dispatch.escalation);
            dispatch
        };
        Some(self.dispatch(dispatch).await)
    }

    pub fn escalation_state(&self) -> EscalationState {
        lock(&self.escalation).state()
    }

    async fn dispatch(&self, dispatch: Dispatch) -> Result<SendReceipt, EscalationError> {
        let result = self.deliver(&dispatch).await;
        {
            let mut escalation = lock(&self.escalation);
            escalation.finish_dispatch(result.is_ok());
        }

        match &result {
            Ok(receipt) => {
                info!(
                    escalation = dispatch.escalation,
                    delivered = receipt.delivered,
                    "emergency alert sent"
                );
                self.emit(GuardianEvent::AlertSent {
                    trigger: dispatch.trigger,
                    delivered: receipt.delivered,
                });
            }
            Err(error) => {
                warn!(escalation = dispatch.escalation, %error, "emergency alert failed");
                self.emit(GuardianEvent::AlertFailed {
                    error: error.clone(),
                });
            }
        }
        result
    }

    async fn deliver(&self, dispatch: &Dispatch) -> Result<SendReceipt, EscalationError> {
        let recipients = self.recipients().await?;
        let body = compose_alert(
            &dispatch.trigger,
            dispatch.location,
            self.context.system_time(),
            self.config.escalation.sender_name.as_deref(),
        );
        let alert = OutboundAlert::new(recipients, body, dispatch.location);
        self.sender
            .send(alert)
            .await
            .map_err(EscalationError::SendFailure)
    }

    async fn recipients(&self) -> Result<Vec<String>, EscalationError> {
        let contacts = self
            .contacts
            .contacts()
            .await
            .map_err(EscalationError::ContactStore)?;
        let phones: Vec<String> = contacts
            .into_iter()
            .filter(Contact::is_reachable)
            .map(|contact| contact.phone)
            .collect();

        if phones.is_empty() {
            return Err(EscalationError::NoContacts);
        }
        Ok(phones)
    }

    /// Shares the current location with one number, outside any escalation.
    pub async fn share_location(&self, phone: &str) -> Result<SendReceipt, EscalationError> {
        let location = {
            let escalation = lock(&self.escalation);
            escalation.location()
        }
        .ok_or(EscalationError::LocationUnavailable)?;

        let body = compose_location_share(
            location,
            self.context.system_time(),
            self.config.escalation.sender_name.as_deref(),
        );
        let alert = OutboundAlert::new(vec![phone.to_string()], body, Some(location));
        let receipt = self
            .sender
            .send(alert)
            .await
            .map_err(EscalationError::SendFailure)?;
        info!(delivered = receipt.delivered, "location shared");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::equatorial_degrees;
    use async_trait::async_trait;
    use safepath_env::TokioContext;
    use std::collections::VecDeque;

    struct Book(Vec<Contact>);

    #[async_trait]
    impl ContactStore for Book {
        async fn contacts(&self) -> Result<Vec<Contact>, EnvError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<OutboundAlert>>,
        fail: bool,
    }

    impl Outbox {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn count(&self) -> usize {
            lock(&self.sent).len()
        }
    }

    #[async_trait]
    impl AlertSender for Outbox {
        async fn send(&self, alert: OutboundAlert) -> Result<SendReceipt, EnvError> {
            if self.fail {
                return Err(EnvError::transport("SMS not available"));
            }
            let delivered = alert.recipients.len();
            lock(&self.sent).push(alert);
            Ok(SendReceipt { delivered })
        }
    }

    /// Replays a fixed list of provider results, one per second.
    #[derive(Default)]
    struct ScriptedFeed {
        samples: Mutex<VecDeque<Result<LocationSample, EnvError>>>,
        hang: bool,
    }

    impl ScriptedFeed {
        fn new(samples: Vec<Result<LocationSample, EnvError>>) -> Self {
            Self {
                samples: Mutex::new(samples.into()),
                hang: false,
            }
        }

        fn unresponsive() -> Self {
            Self {
                hang: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl LocationProvider for ScriptedFeed {
        async fn current_location(&self) -> Result<LocationSample, EnvError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            let front = lock(&self.samples).front().cloned();
            front.unwrap_or_else(|| Err(EnvError::unavailable("no fix")))
        }

        async fn next_sample(&self) -> Option<Result<LocationSample, EnvError>> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let next = lock(&self.samples).pop_front();
            next
        }
    }

    type TestGuardian = Guardian<TokioContext, Book, Outbox>;

    fn contacts() -> Vec<Contact> {
        vec![
            Contact::new("Asha", "+911111111111"),
            Contact::new("No number", ""),
            Contact::new("Ravi", "+912222222222"),
        ]
    }

    fn guardian(
        book: Vec<Contact>,
        outbox: Outbox,
        timers: TimerMode,
    ) -> (TestGuardian, Arc<Outbox>, mpsc::UnboundedReceiver<GuardianEvent>) {
        let outbox = Arc::new(outbox);
        let config = GuardianConfig {
            timers,
            ..GuardianConfig::default()
        };
        let (guardian, events) = Guardian::new(
            TokioContext::shared(),
            Arc::new(Book(book)),
            Arc::clone(&outbox),
            config,
        );
        (guardian, outbox, events)
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<GuardianEvent>) -> Vec<GuardianEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn equator(offsets_m: &[f64]) -> Vec<Coordinate> {
        offsets_m
            .iter()
            .map(|m| Coordinate::new(0.0, equatorial_degrees(*m)))
            .collect()
    }

    #[test]
    fn test_guardian_config_from_json() {
        let config = GuardianConfig::from_json(
            r#"{ "monitor": { "checkpoint_radius_m": 75.0 }, "timers": "stepped" }"#,
        )
        .unwrap();
        assert_eq!(config.monitor.checkpoint_radius_m, 75.0);
        assert_eq!(config.monitor.average_speed_kmh, 40.0);
        assert_eq!(config.escalation.modal_countdown_secs, 30);
        assert_eq!(config.timers, TimerMode::Stepped);

        assert_eq!(GuardianConfig::from_json("{}").unwrap(), GuardianConfig::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_escalation_without_contacts() {
        let (guardian, outbox, mut events) =
            guardian(vec![Contact::new("Blank", " ")], Outbox::default(), TimerMode::Spawned);

        assert_eq!(guardian.trigger_manual().await, Err(EscalationError::NoContacts));
        assert_eq!(guardian.escalation_state().phase, EscalationPhase::Idle);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(outbox.count(), 0);
        assert_eq!(
            drain(&mut events),
            vec![GuardianEvent::AlertFailed {
                error: EscalationError::NoContacts
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sos_button_sends_after_three_seconds() {
        let (guardian, outbox, mut events) =
            guardian(contacts(), Outbox::default(), TimerMode::Spawned);
        guardian.update_location(Coordinate::new(28.7041, 77.1025));

        assert_eq!(guardian.sos_button().await, Ok(true));
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(outbox.count(), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(outbox.count(), 1);
        {
            let sent = lock(&outbox.sent);
            assert_eq!(sent[0].recipients, vec!["+911111111111", "+912222222222"]);
            assert!(sent[0].body.contains("https://maps.google.com/?q=28.7041,77.1025"));
        }
        assert_eq!(guardian.escalation_state().phase, EscalationPhase::Sent);

        let log = drain(&mut events);
        assert!(matches!(log.first(), Some(GuardianEvent::EscalationStarted { remaining_seconds: 3, .. })));
        assert!(matches!(log.last(), Some(GuardianEvent::AlertSent { delivered: 2, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_expiry_never_sends() {
        let (guardian, outbox, mut events) =
            guardian(contacts(), Outbox::default(), TimerMode::Spawned);

        assert_eq!(guardian.trigger_manual().await, Ok(true));
        // Second trigger while counting down is a no-op
        assert_eq!(guardian.trigger_manual().await, Ok(false));

        tokio::time::sleep(Duration::from_millis(29_500)).await;
        assert!(guardian.cancel());
        assert!(!guardian.cancel());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(outbox.count(), 0);
        assert_eq!(guardian.escalation_state().phase, EscalationPhase::Idle);

        let log = drain(&mut events);
        let started = log
            .iter()
            .filter(|e| matches!(e, GuardianEvent::EscalationStarted { .. }))
            .count();
        assert_eq!(started, 1);
        assert_eq!(log.last(), Some(&GuardianEvent::EscalationCancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_returns_to_idle() {
        let (guardian, _outbox, mut events) =
            guardian(contacts(), Outbox::failing(), TimerMode::Stepped);

        assert_eq!(guardian.trigger_manual().await, Ok(true));
        let result = guardian.send_now().await;
        assert!(matches!(result, Some(Err(EscalationError::SendFailure(_)))));
        assert_eq!(guardian.escalation_state().phase, EscalationPhase::Idle);

        // The user can retry
        assert_eq!(guardian.trigger_manual().await, Ok(true));
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, GuardianEvent::AlertFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stepped_countdown() {
        let (guardian, outbox, _events) = guardian(contacts(), Outbox::default(), TimerMode::Stepped);

        guardian.sos_button().await.unwrap();
        assert!(guardian.countdown_tick().await.is_none());
        assert!(guardian.countdown_tick().await.is_none());
        let fired = guardian.countdown_tick().await;
        assert_eq!(fired, Some(Ok(SendReceipt { delivered: 2 })));
        assert_eq!(outbox.count(), 1);

        // Nothing left to tick
        assert!(guardian.countdown_tick().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_journey_misses_every_checkpoint() {
        let (guardian, outbox, mut events) =
            guardian(contacts(), Outbox::default(), TimerMode::Spawned);

        let route = equator(&[0.0, 1_500.0, 3_000.0, 4_500.0, 6_000.0]);
        let checkpoints = guardian.init_route(route.clone(), RouteMode::Automatic).unwrap();
        guardian.start_monitoring(Some(route[0])).unwrap();

        // Never moves; 6 km at 40 km/h is 540 s
        tokio::time::sleep(Duration::from_secs(3_600)).await;

        let log = drain(&mut events);
        let missed: Vec<usize> = log
            .iter()
            .filter_map(|e| match e {
                GuardianEvent::CheckpointMissed { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(missed, (0..checkpoints.len()).collect::<Vec<_>>());
        assert_eq!(
            log.iter()
                .filter(|e| matches!(e, GuardianEvent::RouteCompleted { .. }))
                .count(),
            1
        );
        assert!(!guardian.is_monitoring());
        assert!(outbox.count() >= 1);
        assert!(lock(&outbox.sent)[0].body.contains("Missed Safety Checkpoint!"));
        assert!(guardian.checkpoints().iter().all(|c| c.reached_at.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_monitoring_halts_evaluation() {
        let (guardian, _outbox, mut events) =
            guardian(contacts(), Outbox::default(), TimerMode::Spawned);

        let route = equator(&[0.0, 3_000.0]);
        guardian.init_route(route.clone(), RouteMode::Automatic).unwrap();
        guardian.start_monitoring(Some(route[0])).unwrap();
        guardian.stop_monitoring();
        guardian.stop_monitoring();

        tokio::time::sleep(Duration::from_secs(3_600)).await;
        assert!(drain(&mut events).is_empty());
        assert!(guardian.checkpoints()[0].is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_arrival_completes_route() {
        let (guardian, _outbox, mut events) =
            guardian(contacts(), Outbox::default(), TimerMode::Stepped);

        let route = equator(&[0.0, 2_500.0, 5_000.0]);
        guardian.init_route(route.clone(), RouteMode::Automatic).unwrap();
        guardian.start_monitoring(Some(route[0])).unwrap();

        guardian.update_location(route[1]);
        assert!(matches!(guardian.evaluate().await, Some(MonitorEvent::Reached { index: 0, .. })));
        guardian.update_location(route[2]);
        assert!(matches!(guardian.evaluate().await, Some(MonitorEvent::Reached { index: 1, .. })));

        let log = drain(&mut events);
        assert_eq!(log.len(), 3);
        assert!(matches!(
            log[2],
            GuardianEvent::RouteCompleted { progress } if progress.reached == 2
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_share_location() {
        let (guardian, outbox, _events) = guardian(contacts(), Outbox::default(), TimerMode::Stepped);
        assert_eq!(
            guardian.share_location("+913333333333").await,
            Err(EscalationError::LocationUnavailable)
        );

        guardian.ingest(Ok(LocationSample::new(
            Coordinate::new(12.5, -3.25),
            Some(8.0),
            guardian.context().system_time(),
        )));
        let receipt = guardian.share_location("+913333333333").await.unwrap();
        assert_eq!(receipt.delivered, 1);
        assert!(lock(&outbox.sent)[0].body.contains("Location shared"));
        assert_eq!(guardian.escalation_state().phase, EscalationPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_errors_are_surfaced() {
        let (guardian, _outbox, mut events) =
            guardian(contacts(), Outbox::default(), TimerMode::Stepped);
        guardian.ingest(Err(EnvError::PermissionDenied));
        assert_eq!(
            drain(&mut events),
            vec![GuardianEvent::LocationError {
                error: EnvError::PermissionDenied
            }]
        );
    }

    #[test]
    fn test_stale_disarm_leaves_newer_timer_running() {
        let slot = TimerSlot::default();
        let first = slot.arm(1);
        let second = slot.arm(2);
        assert!(*first.borrow());

        slot.disarm_generation(1);
        assert!(!*second.borrow());

        slot.disarm_generation(2);
        assert!(*second.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_after_cancel_still_fires() {
        let (guardian, outbox, _events) =
            guardian(contacts(), Outbox::default(), TimerMode::Spawned);

        assert_eq!(guardian.trigger_manual().await, Ok(true));
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert!(guardian.cancel());

        assert_eq!(guardian.sos_button().await, Ok(true));
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(outbox.count(), 1);
        assert_eq!(guardian.escalation_state().phase, EscalationPhase::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_feeds_monitor_until_feed_ends() {
        let (guardian, _outbox, mut events) =
            guardian(contacts(), Outbox::default(), TimerMode::Stepped);

        let route = equator(&[0.0, 2_500.0, 5_000.0]);
        guardian.init_route(route.clone(), RouteMode::Automatic).unwrap();
        guardian.start_monitoring(Some(route[0])).unwrap();

        let now = guardian.context().system_time();
        let feed = Arc::new(ScriptedFeed::new(vec![
            Ok(LocationSample::new(route[1], Some(5.0), now)),
            Err(EnvError::unavailable("tunnel")),
        ]));
        guardian.follow(Arc::clone(&feed));
        tokio::time::sleep(Duration::from_secs(5)).await;

        // The feed task has returned and released its handle
        assert_eq!(Arc::strong_count(&feed), 1);
        assert!(matches!(guardian.evaluate().await, Some(MonitorEvent::Reached { index: 0, .. })));

        let log = drain(&mut events);
        assert_eq!(log.len(), 2);
        assert_eq!(
            log[0],
            GuardianEvent::LocationError {
                error: EnvError::unavailable("tunnel")
            }
        );
        assert!(matches!(log[1], GuardianEvent::CheckpointReached { index: 0, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_times_out() {
        let (guardian, _outbox, mut events) =
            guardian(contacts(), Outbox::default(), TimerMode::Stepped);

        let started = guardian.context().now();
        assert_eq!(
            guardian.locate(&ScriptedFeed::unresponsive()).await,
            Err(EnvError::Timeout(15_000))
        );
        assert!(guardian.context().now() - started >= Duration::from_secs(15));
        assert_eq!(
            drain(&mut events),
            vec![GuardianEvent::LocationError {
                error: EnvError::Timeout(15_000)
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_forgets_last_fix() {
        let (guardian, outbox, _events) = guardian(contacts(), Outbox::default(), TimerMode::Stepped);

        let route = equator(&[0.0, 3_000.0]);
        guardian.init_route(route.clone(), RouteMode::Automatic).unwrap();
        guardian.start_monitoring(Some(route[0])).unwrap();
        guardian.update_location(route[1]);

        guardian.reset();
        assert_eq!(guardian.escalation_state().location, None);
        assert_eq!(
            guardian.share_location("+913333333333").await,
            Err(EscalationError::LocationUnavailable)
        );
        assert_eq!(outbox.count(), 0);
    }
}
