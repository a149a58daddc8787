//! SafePath Deterministic Simulation Testing (DST) Harness
//!
//! This crate provides a controlled world in which the real route monitor and
//! escalation controller run against scripted journeys, deterministically.
//!
//! # Core Principle: Stepped Timers
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: A virtual clock advanced one second per tick
//! - **Timers**: The guardian runs in stepped mode; the runner drives the
//!   5 s evaluation and the 1 s countdown itself
//! - **Randomness**: GPS noise derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (Virtual Clock + seeded RNG streams)      │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼──────────┐       ┌─────▼─────────┐                  │
//! │  │   Guardian    │──────►│ SimAlertSender│  (outage switch)  │
//! │  │ (real engines)│       └───────────────┘                  │
//! │  └───────▲───────┘                                          │
//! │          │ locate()                                         │
//! │  ┌───────┴────────────────────────────┐                     │
//! │  │ SimLocationFeed ◄── Traveller       │                     │
//! │  │ (permission)        (ground truth)  │                     │
//! │  └─────────────────────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use safepath_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::Stalled);
//! assert!(result.passed);
//! ```

mod collaborators;
mod context;
mod exporter;
mod runner;
mod traveller;
pub mod scenarios;

pub use collaborators::{DeliveredAlert, SimAlertSender, SimContactBook, SimLocationFeed};
pub use context::SimContext;
pub use exporter::{CheckpointMarker, Position, SimEvent, SimExport, SimFrame};
pub use runner::{load_config, planned_route, ScenarioMetrics, ScenarioResult, ScenarioRunner, SimError};
pub use traveller::Traveller;
