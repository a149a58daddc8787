//! Composition of the text contacts receive.

use crate::escalation::Trigger;
use chrono::{DateTime, Utc};
use safepath_env::Coordinate;
use std::time::SystemTime;

/// Placeholder used when no fix is known at send time.
pub const LOCATION_UNAVAILABLE: &str = "Location unavailable";

const DEFAULT_SENDER: &str = "SafePath";

/// Human-readable UTC timestamp used in every message.
pub fn format_timestamp(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string()
}

/// Emergency alert body.
///
/// A checkpoint-triggered alert names the checkpoint and its deadline. The
/// location is given as coordinates plus a map link, or as
/// [`LOCATION_UNAVAILABLE`].
pub fn compose_alert(
    trigger: &Trigger,
    location: Option<Coordinate>,
    created_at: SystemTime,
    sender_name: Option<&str>,
) -> String {
    let mut body = format!(
        "🚨 EMERGENCY ALERT from {}\n\n",
        sender_name.unwrap_or(DEFAULT_SENDER)
    );

    match trigger {
        Trigger::CheckpointMissed(checkpoint) => {
            let expected = checkpoint
                .expected_arrival
                .map(format_timestamp)
                .unwrap_or_else(|| "not scheduled".to_string());
            body.push_str("Missed Safety Checkpoint!\n");
            body.push_str(&format!("Checkpoint: {}\n", checkpoint.name));
            body.push_str(&format!("Expected arrival: {}\n\n", expected));
        }
        Trigger::Manual => body.push_str("I need immediate help!\n\n"),
    }

    match location {
        Some(at) => body.push_str(&format!(
            "Current Location:\nLat: {:.6}\nLng: {:.6}\nGoogle Maps: {}\n\n",
            at.latitude,
            at.longitude,
            at.map_link()
        )),
        None => body.push_str(&format!("Current Location: {}\n\n", LOCATION_UNAVAILABLE)),
    }

    body.push_str(&format!("Time: {}\n", format_timestamp(created_at)));
    body.push_str("Please check on me immediately!");
    body
}

/// Non-emergency "here I am" message.
pub fn compose_location_share(
    location: Coordinate,
    created_at: SystemTime,
    sender_name: Option<&str>,
) -> String {
    format!(
        "📍 Location shared by {}\n\nCurrent location:\n{}\n\nTime: {}\nSent via SafePath",
        sender_name.unwrap_or(DEFAULT_SENDER),
        location.map_link(),
        format_timestamp(created_at),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route_monitor::CheckpointSnapshot;
    use std::time::{Duration, UNIX_EPOCH};

    fn t0() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_704_067_200)
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(t0()), "2024-01-01 00:00:00 UTC");
    }

    #[test]
    fn test_manual_alert_with_location() {
        let body = compose_alert(
            &Trigger::Manual,
            Some(Coordinate::new(28.7041, 77.1025)),
            t0(),
            Some("Priya"),
        );

        assert!(body.starts_with("🚨 EMERGENCY ALERT from Priya"));
        assert!(body.contains("I need immediate help!"));
        assert!(body.contains("Lat: 28.704100"));
        assert!(body.contains("Lng: 77.102500"));
        assert!(body.contains("https://maps.google.com/?q=28.7041,77.1025"));
        assert!(body.contains("Time: 2024-01-01 00:00:00 UTC"));
        assert!(!body.contains("Checkpoint"));
        assert!(!body.contains(LOCATION_UNAVAILABLE));
    }

    #[test]
    fn test_manual_alert_layout() {
        let body = compose_alert(
            &Trigger::Manual,
            Some(Coordinate::new(28.7041, 77.1025)),
            t0(),
            Some("Priya"),
        );
        let expected = "🚨 EMERGENCY ALERT from Priya\n\n\
                        I need immediate help!\n\n\
                        Current Location:\n\
                        Lat: 28.704100\n\
                        Lng: 77.102500\n\
                        Google Maps: https://maps.google.com/?q=28.7041,77.1025\n\n\
                        Time: 2024-01-01 00:00:00 UTC\n\
                        Please check on me immediately!";
        assert_eq!(body, expected);
    }

    #[test]
    fn test_checkpoint_alert_without_location() {
        let trigger = Trigger::CheckpointMissed(CheckpointSnapshot {
            id: "checkpoint_3".to_string(),
            name: "Checkpoint 3".to_string(),
            position: Coordinate::new(0.0, 0.0),
            expected_arrival: Some(t0() + Duration::from_secs(900)),
        });
        let body = compose_alert(&trigger, None, t0() + Duration::from_secs(960), None);

        assert!(body.starts_with("🚨 EMERGENCY ALERT from SafePath"));
        assert!(body.contains("Missed Safety Checkpoint!"));
        assert!(body.contains("Checkpoint: Checkpoint 3"));
        assert!(body.contains("Expected arrival: 2024-01-01 00:15:00 UTC"));
        assert!(body.contains(LOCATION_UNAVAILABLE));
        assert!(!body.contains("maps.google.com"));
        assert!(body.contains("Time: 2024-01-01 00:16:00 UTC"));
        assert!(body.ends_with("Please check on me immediately!"));
    }

    #[test]
    fn test_location_share() {
        let body = compose_location_share(Coordinate::new(12.5, -3.25), t0(), None);
        assert!(body.contains("Location shared by SafePath"));
        assert!(body.contains("https://maps.google.com/?q=12.5,-3.25"));
    }
}
