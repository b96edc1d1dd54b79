use thiserror::Error;

/// Error kinds surfaced by the simulator, per the propagation policy: bad
/// configuration and malformed input are fatal, cancellation and event-limit
/// overflow are not (callers still get the report accumulated so far).
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid cache configuration ({field}): {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("malformed trace record at line {line}: {reason}")]
    MalformedTrace { line: usize, reason: String },

    #[error("simulation cancelled after {events} events")]
    Cancelled { events: u64 },

    #[error("event limit of {limit} exceeded")]
    Overflow { limit: u64 },
}

impl SimError {
    /// Exit code for this error if the driver chooses to surface it as a
    /// process failure. `Cancelled`/`Overflow` are not fatal per the
    /// propagation policy; the engine returns `Ok(Report)` with a flag set
    /// instead of these variants in the normal run loop. They exist so a
    /// caller building a stricter API (e.g. a streaming server) can still
    /// surface them as errors with a well-defined code.
    pub fn exit_code(&self) -> i32 {
        match self {
            SimError::MalformedTrace { .. } => 1,
            SimError::InvalidConfig { .. } => 2,
            SimError::Cancelled { .. } => 3,
            SimError::Overflow { .. } => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
