pub mod error;
pub mod events;
pub mod metrics;
pub mod rules;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod telemetry;
pub mod ticket;

pub use error::{BoxError, EngineError};

/// Current wall-clock time as epoch seconds, the timestamp unit used on
/// tickets and bus events.
pub fn epoch_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
