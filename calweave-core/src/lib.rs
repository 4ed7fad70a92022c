//! Core types and engines for calweave.
//!
//! This crate unifies events from several calendar providers and reasons about them:
//! - `event` and `date_range` for the provider-neutral data model
//! - `provider` for the adapter contract and the built-in backends
//! - `conflict` for deterministic conflict detection and clustering
//! - `scheduler` for buffer-aware slot finding
//! - `bus` for priority-tiered change notifications
//! - `manager` for the fan-out/merge cycle and the capture-to-event pipeline

pub mod bus;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod date_range;
pub mod error;
pub mod event;
pub mod intent;
pub mod manager;
pub mod provider;
pub mod routing;
pub mod scheduler;
pub mod store;

pub use error::{CalWeaveError, CalWeaveResult};
pub use event::*;
