//! CivicPulse Simulation Harness
//!
//! This crate drives the replay engine and the scenario scheduler end to end
//! against a reproducible city.
//!
//! # Core Principle: One Seed, One City
//!
//! All sources of non-determinism are controlled:
//! - **Time**: replay and playback pace on a virtual clock; scenario timers
//!   run on a paused tokio clock unless real time is requested
//! - **Data**: the event log is generated from ChaCha8 streams derived from
//!   a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        DemoRunner                        │
//! │  ┌──────────────┐   seed_store   ┌────────────────────┐  │
//! │  │ CityHistory  │ ─────────────► │ EventStore         │  │
//! │  │ (seeded RNG) │                │ (memory or sled)   │  │
//! │  └──────────────┘                └─────────┬──────────┘  │
//! │                                            │             │
//! │     timeline · snapshot · replay · playback · scenario   │
//! │                                            │             │
//! │                                   ┌────────▼─────────┐   │
//! │                                   │ SimExport (JSON) │   │
//! │                                   └──────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use civicpulse_sim::{DemoId, DemoRunner};
//!
//! let runner = DemoRunner::new(42).with_speed(4.0);
//! runner.seed_store(store.as_ref()).await?;
//! let result = runner.run(DemoId::Replay, store.clone()).await;
//! ```

mod context;
mod error;
mod exporter;
mod history;
mod runner;
pub mod demos;

pub use context::SimContext;
pub use demos::DemoId;
pub use error::SimError;
pub use exporter::{SimEvent, SimExport, SimFrame};
pub use history::{CityHistory, HistoryConfig};
pub use runner::{DemoMetrics, DemoResult, DemoRunner};
