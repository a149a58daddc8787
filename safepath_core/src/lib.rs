//! SafePath Core - Route monitoring and emergency escalation for a traveller
//!
//! This library answers two questions while a user travels:
//! 1. **Are they on schedule?** Checkpoints along the route get arrival
//!    deadlines from an assumed speed; arriving inside the radius reaches a
//!    checkpoint, passing the deadline misses it
//! 2. **Should someone be told?** A missed checkpoint or an SOS starts a
//!    cancellable countdown that ends in an alert to every emergency contact

pub mod alert_message;
pub mod escalation;
pub mod geodesy;
pub mod guardian_runtime;
pub mod route_monitor;

// Re-export key types for convenience
pub use alert_message::{compose_alert, compose_location_share};
pub use escalation::{
    Countdown, EscalationConfig, EscalationController, EscalationError, EscalationPhase,
    EscalationState, Trigger,
};
pub use geodesy::haversine_distance;
pub use guardian_runtime::{Guardian, GuardianConfig, GuardianEvent, TimerMode};
pub use route_monitor::{
    Checkpoint, CheckpointStatus, MonitorConfig, MonitorEvent, RouteError, RouteMode,
    RouteMonitor, RouteProgress,
};
