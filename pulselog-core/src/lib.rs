//! # pulselog-core
//!
//! Client-side telemetry pipeline: capture discrete events, hold them in a
//! bounded in-memory buffer, and deliver them in batches to a remote
//! collector with at-least-once semantics.
//!
//! This library provides:
//! - Domain types for events and sync results
//! - A capacity-bounded event buffer with a delivery watermark
//! - Debounced flush triggering
//! - A single-flight sync coordinator with bounded retry
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! producers ─► Analytics::record ─► EventBuffer ─► FlushTrigger ─(debounced)─► host scheduler
//!                                        ▲                                         │
//!                                        └──── acknowledge ◄── SyncCoordinator ◄───┘
//!                                                                 │
//!                                                          DeliveryClient ─► collector
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use pulselog_core::{Analytics, Config};
//!
//! let config = Config::load().expect("failed to load config");
//! let analytics = Analytics::from_config(&config);
//! analytics.visit("home");
//! assert_eq!(analytics.pending_count(), 1);
//! ```

// Re-export commonly used items at the crate root
pub use analytics::{Analytics, EventPayload};
pub use buffer::EventBuffer;
pub use config::Config;
pub use error::{DeliveryError, Error, Result};
pub use sync::{RetryPolicy, SyncCoordinator, SyncStats};
pub use types::*;

// Public modules
pub mod analytics;
pub mod buffer;
pub mod config;
pub mod delivery;
pub mod device;
pub mod error;
pub mod logging;
pub mod session;
pub mod sync;
pub mod trigger;
pub mod types;
