//! SafePath Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seams that let the SafePath engines run
//! against real collaborators in **Production** (tokio, platform GPS, an SMS
//! relay) and against scripted ones in **Simulation** (virtual clock, seeded
//! GPS noise, recording sender).
//!
//! # Core Concept
//!
//! The route monitor and the escalation controller never touch I/O directly.
//! Everything that suspends or observes the outside world goes through a trait:
//! - Time (`now()`, `system_time()`, `sleep()`, `spawn()`)
//! - Position fixes (`LocationProvider`)
//! - Emergency contacts (`ContactStore`)
//! - Alert delivery (`AlertSender`)
//!
//! # Example
//!
//! ```ignore
//! use safepath_env::{GuardianContext, LocationProvider};
//!
//! async fn feed<Ctx: GuardianContext, Loc: LocationProvider>(ctx: &Ctx, gps: &Loc) {
//!     while let Some(sample) = gps.next_sample().await {
//!         match sample {
//!             Ok(fix) => record(fix.coordinate),
//!             Err(e) => surface(e),
//!         }
//!     }
//! }
//! ```

mod collaborators;
mod context;
mod error;
mod tokio_impl;
mod types;

pub use collaborators::{AlertSender, ContactStore, LocationProvider};
pub use context::GuardianContext;
pub use error::EnvError;
pub use tokio_impl::TokioContext;
pub use types::{Contact, Coordinate, LocationSample, OutboundAlert, SendReceipt, SessionId};
