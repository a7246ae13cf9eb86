//! Forward collectd samples to the Gnocchi time-series service.
//!
//! The embedding process feeds measurement events in through
//! [`Plugin::write`] (or [`GnocchiSink::submit`] directly). Samples are
//! buffered, drained in host-grouped batches to Gnocchi's batch-measures
//! API, and the resource type and per-host resources are created on demand
//! the first time the server rejects a batch for missing them.
//!
//! Delivery is at-most-once: a batch that fails to submit is dropped, not
//! re-buffered.

pub mod buffer;
pub mod config;
pub mod gnocchi;
pub mod http;
pub mod identifier;
pub mod measures;
pub mod plugin;
pub mod sample;
pub mod sink;

pub use config::{AuthMode, ConfigError, GnocchiConfig};
pub use plugin::Plugin;
pub use sample::Sample;
pub use sink::{FlushError, GnocchiSink, InitError};
