//! Simulated collaborators: contact book, SMS gateway and GPS feed.

use crate::context::SimContext;
use crate::traveller::Traveller;
use async_trait::async_trait;
use safepath_env::{
    AlertSender, Contact, ContactStore, Coordinate, EnvError, GuardianContext, LocationProvider,
    LocationSample, OutboundAlert, SendReceipt,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed, in-memory contact book.
#[derive(Debug, Clone, Default)]
pub struct SimContactBook {
    contacts: Vec<Contact>,
}

impl SimContactBook {
    pub fn new(contacts: Vec<Contact>) -> Self {
        Self { contacts }
    }

    /// The two-contact book used by most scenarios.
    pub fn family() -> Self {
        Self::new(vec![
            Contact::new("Mum", "+15550100001"),
            Contact::new("Sam", "+15550100002"),
        ])
    }
}

#[async_trait]
impl ContactStore for SimContactBook {
    async fn contacts(&self) -> Result<Vec<Contact>, EnvError> {
        Ok(self.contacts.clone())
    }
}

/// An alert as the gateway saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredAlert {
    /// Virtual wall-clock time of delivery
    pub at: SystemTime,
    pub alert: OutboundAlert,
}

/// SMS gateway that records every message and can be switched offline.
pub struct SimAlertSender {
    context: Arc<SimContext>,
    delivered: Mutex<Vec<DeliveredAlert>>,
    outage: AtomicBool,
    attempts: AtomicU64,
}

impl SimAlertSender {
    pub fn new(context: Arc<SimContext>) -> Self {
        Self {
            context,
            delivered: Mutex::new(Vec::new()),
            outage: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
        }
    }

    /// While offline every send fails with a transport error.
    pub fn set_outage(&self, offline: bool) {
        self.outage.store(offline, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<DeliveredAlert> {
        lock(&self.delivered).clone()
    }

    pub fn delivered_count(&self) -> usize {
        lock(&self.delivered).len()
    }

    /// Sends attempted, successful or not.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertSender for SimAlertSender {
    async fn send(&self, alert: OutboundAlert) -> Result<SendReceipt, EnvError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.outage.load(Ordering::SeqCst) {
            return Err(EnvError::transport("SMS gateway unreachable"));
        }

        let delivered = alert.recipients.len();
        lock(&self.delivered).push(DeliveredAlert {
            at: self.context.system_time(),
            alert,
        });
        Ok(SendReceipt { delivered })
    }
}

/// GPS receiver observing a simulated traveller.
pub struct SimLocationFeed {
    context: Arc<SimContext>,
    traveller: Mutex<Traveller>,
    sample_interval: Duration,
    accuracy_m: f64,
    permission_denied: AtomicBool,
    closed: AtomicBool,
}

impl SimLocationFeed {
    pub fn new(context: Arc<SimContext>, traveller: Traveller) -> Self {
        Self {
            context,
            traveller: Mutex::new(traveller),
            sample_interval: Duration::from_secs(1),
            accuracy_m: 5.0,
            permission_denied: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Simulates the user refusing location access.
    pub fn deny_permission(&self) {
        self.permission_denied.store(true, Ordering::SeqCst);
    }

    /// Ends the subscription; `next_sample` returns `None` afterwards.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Moves the traveller forward by dt seconds.
    pub fn advance(&self, dt: f64) {
        lock(&self.traveller).step(dt);
    }

    /// Ground truth, for exports and assertions.
    pub fn true_position(&self) -> Option<Coordinate> {
        lock(&self.traveller).true_position()
    }

    /// Distance the traveller has covered.
    pub fn travelled(&self) -> f64 {
        lock(&self.traveller).travelled()
    }

    pub fn has_arrived(&self) -> bool {
        lock(&self.traveller).has_arrived()
    }
}

#[async_trait]
impl LocationProvider for SimLocationFeed {
    async fn current_location(&self) -> Result<LocationSample, EnvError> {
        if self.permission_denied.load(Ordering::SeqCst) {
            return Err(EnvError::PermissionDenied);
        }

        let fix = lock(&self.traveller).observe();
        fix.map(|coordinate| {
            LocationSample::new(coordinate, Some(self.accuracy_m), self.context.system_time())
        })
        .ok_or_else(|| EnvError::unavailable("no route to follow"))
    }

    async fn next_sample(&self) -> Option<Result<LocationSample, EnvError>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.context.sleep(self.sample_interval).await;
        self.advance(self.sample_interval.as_secs_f64());
        Some(self.current_location().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safepath_core::geodesy::equatorial_degrees;

    fn route() -> Vec<Coordinate> {
        vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(0.0, equatorial_degrees(1_000.0)),
        ]
    }

    #[tokio::test]
    async fn test_sender_records_and_fails_during_outage() {
        let ctx = SimContext::shared(1);
        let sender = SimAlertSender::new(Arc::clone(&ctx));

        let alert = OutboundAlert::new(vec!["+1".into(), "+2".into()], "help".into(), None);
        assert_eq!(sender.send(alert.clone()).await, Ok(SendReceipt { delivered: 2 }));

        sender.set_outage(true);
        assert!(matches!(sender.send(alert.clone()).await, Err(EnvError::Transport(_))));
        sender.set_outage(false);

        assert_eq!(sender.delivered_count(), 1);
        assert_eq!(sender.attempts(), 2);
        assert_eq!(sender.delivered()[0].alert, alert);
    }

    #[tokio::test]
    async fn test_feed_permission_denied() {
        let ctx = SimContext::shared(1);
        let feed = SimLocationFeed::new(Arc::clone(&ctx), Traveller::new(route(), 36.0, 1));
        assert!(feed.current_location().await.is_ok());

        feed.deny_permission();
        assert_eq!(feed.current_location().await, Err(EnvError::PermissionDenied));
    }

    #[tokio::test]
    async fn test_feed_subscription_advances_clock_and_traveller() {
        let ctx = SimContext::shared(1);
        let feed = SimLocationFeed::new(
            Arc::clone(&ctx),
            Traveller::new(route(), 36.0, 1).with_gps_noise(0.0),
        );

        let sample = feed.next_sample().await.unwrap().unwrap();
        assert_eq!(ctx.now(), Duration::from_secs(1));
        assert_eq!(sample.timestamp, ctx.system_time());
        assert!(sample.coordinate.longitude > 0.0);

        feed.close();
        assert!(feed.next_sample().await.is_none());
    }

    #[tokio::test]
    async fn test_contact_book() {
        let book = SimContactBook::family();
        assert_eq!(book.contacts().await.unwrap().len(), 2);
        assert!(SimContactBook::default().contacts().await.unwrap().is_empty());
    }
}
