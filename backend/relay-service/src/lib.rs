//! dailyfeed ingestion relay
//!
//! Consumes activity events from the date-based Kafka topics, collapses
//! at-least-once redeliveries through a Redis-backed claim protocol, and
//! forwards each logical event exactly once to the downstream sink,
//! committing offsets only after a terminal state.

pub mod config;
pub mod consumers;
pub mod error;
pub mod metrics;
pub mod publishers;
pub mod relay;
pub mod sinks;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use relay::{EventCoordinates, RawMessage, Relay, RelayOutcome, RelaySettings};
