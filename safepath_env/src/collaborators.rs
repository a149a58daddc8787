//! External collaborator abstractions: GPS, contact book, alert delivery.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{Contact, LocationSample, OutboundAlert, SendReceipt};

/// Source of position fixes.
///
/// # Implementations
///
/// - **Production**: Wraps the platform location service
/// - **Simulation**: Scripted traveller with seeded GPS noise
///
/// # Sample Flow
///
/// ```text
/// Platform GPS               Provider                    Guardian
///   |                           |                          |
///   |-- fix (own cadence) ----->|                          |
///   |                           |-- next_sample() -------->|
///   |                           |                          |-- update_location()
/// ```
#[async_trait]
pub trait LocationProvider: Send + Sync + 'static {
    /// Fetches a single fix on demand.
    ///
    /// # Returns
    /// * `Ok(sample)` - A fresh position fix
    /// * `Err(EnvError::PermissionDenied)` - The user refused location access
    /// * `Err(EnvError::LocationUnavailable)` - No fix could be obtained
    async fn current_location(&self) -> Result<LocationSample, EnvError>;

    /// Waits for the next pushed sample of the subscription.
    ///
    /// # Returns
    /// * `Some(Ok(sample))` - A new fix arrived
    /// * `Some(Err(e))` - The provider reported a failure; the subscription
    ///   stays open
    /// * `None` - The subscription was closed (shutdown)
    async fn next_sample(&self) -> Option<Result<LocationSample, EnvError>>;
}

/// Ordered list of emergency contacts.
///
/// The five-contact cap is a product policy enforced by the caller, not here.
#[async_trait]
pub trait ContactStore: Send + Sync + 'static {
    /// Loads the contacts in their configured order.
    async fn contacts(&self) -> Result<Vec<Contact>, EnvError>;
}

/// Delivery of alert messages over SMS, push or a server relay.
#[async_trait]
pub trait AlertSender: Send + Sync + 'static {
    /// Delivers one message to every recipient.
    ///
    /// # Returns
    /// * `Ok(receipt)` - The transport accepted the message
    /// * `Err(EnvError::Transport)` - Delivery failed; nothing is retried
    async fn send(&self, alert: OutboundAlert) -> Result<SendReceipt, EnvError>;
}
