//! Common types for the SafePath environment abstraction.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// A point on the Earth's surface in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a coordinate without validation.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Creates a coordinate, rejecting non-finite or out-of-range values.
    pub fn try_new(latitude: f64, longitude: f64) -> Option<Self> {
        let coordinate = Self::new(latitude, longitude);
        coordinate.is_valid().then_some(coordinate)
    }

    /// Both components finite and within their degree ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Map link in the format contacts receive by SMS.
    pub fn map_link(&self) -> String {
        format!(
            "https://maps.google.com/?q={},{}",
            self.latitude, self.longitude
        )
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// A single fix delivered by a location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub coordinate: Coordinate,

    /// Horizontal accuracy radius in meters, when the platform reports one
    pub accuracy_m: Option<f64>,

    /// When the fix was taken
    pub timestamp: SystemTime,
}

impl LocationSample {
    pub fn new(coordinate: Coordinate, accuracy_m: Option<f64>, timestamp: SystemTime) -> Self {
        Self {
            coordinate,
            accuracy_m,
            timestamp,
        }
    }
}

/// An emergency contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub phone: String,
}

impl Contact {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
        }
    }

    /// Contacts saved without a number cannot be messaged.
    pub fn is_reachable(&self) -> bool {
        !self.phone.trim().is_empty()
    }
}

/// A message handed to the alert sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundAlert {
    /// Phone numbers to deliver to
    pub recipients: Vec<String>,

    /// Fully composed message body
    pub body: String,

    /// Location the body refers to, for relays that attach it separately
    pub location: Option<Coordinate>,
}

impl OutboundAlert {
    pub fn new(recipients: Vec<String>, body: String, location: Option<Coordinate>) -> Self {
        Self {
            recipients,
            body,
            location,
        }
    }
}

/// Acknowledgement returned by a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Number of recipients the transport accepted
    pub delivered: usize,
}

/// Unique identifier for a monitoring session.
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Creates a new random SessionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic SessionId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_validation() {
        assert!(Coordinate::try_new(28.7041, 77.1025).is_some());
        assert!(Coordinate::try_new(90.0, -180.0).is_some());
        assert!(Coordinate::try_new(90.5, 0.0).is_none());
        assert!(Coordinate::try_new(0.0, 181.0).is_none());
        assert!(Coordinate::try_new(f64::NAN, 0.0).is_none());
        assert!(!Coordinate::new(0.0, f64::INFINITY).is_valid());
    }

    #[test]
    fn test_map_link_format() {
        let c = Coordinate::new(28.7041, 77.1025);
        assert_eq!(c.map_link(), "https://maps.google.com/?q=28.7041,77.1025");
        assert_eq!(c.to_string(), "28.704100, 77.102500");
    }

    #[test]
    fn test_contact_reachability() {
        assert!(Contact::new("Asha", "+911234567890").is_reachable());
        assert!(!Contact::new("Ravi", "  ").is_reachable());
    }

    #[test]
    fn test_session_id_from_seed_is_stable() {
        assert_eq!(SessionId::from_seed(7), SessionId::from_seed(7));
        assert_ne!(SessionId::from_seed(7), SessionId::from_seed(8));
    }
}
