//! Error types for the sandbox.
//!
//! Construction problems (bad settings, bad body props) and usage problems
//! (seeking outside the cached range, running with nothing alive, running
//! with a full cache) are all reported through [`SimError`].

use thiserror::Error;

use crate::simulation::states::{BodyId, Tick};

/// Everything that can go wrong inside the simulation or its worker.
#[derive(Error, Debug)]
pub enum SimError {
    /// Physics or cache settings failed validation
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// Body props failed validation
    #[error("invalid body: {0}")]
    InvalidBody(String),

    /// Requested tick is not inside the cached range
    #[error("tick {tick} is out of range {first} - {last}")]
    TickOutOfRange { tick: Tick, first: Tick, last: Tick },

    /// A call argument was out of its allowed range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Tried to run with no bodies alive at the start tick
    #[error("cannot run without any living bodies at tick {0}")]
    NoLivingBodies(Tick),

    /// Cache memory ceiling reached
    #[error("cache is full at tick {0}")]
    CacheFull(Tick),

    /// A message or call referenced a body the host does not know about
    #[error("unknown body id {0}")]
    UnknownBody(BodyId),

    /// A worker payload could not be decoded
    #[error("malformed worker message: {0}")]
    MalformedMessage(String),

    /// The worker reported an error and stopped
    #[error("worker failed: {0}")]
    WorkerFailed(String),

    /// The worker's channel closed while a run was in progress
    #[error("worker disconnected unexpectedly")]
    WorkerDisconnected,

    /// Operation requires a running worker
    #[error("simulation is not running")]
    NotRunning,

    /// Serialization of a simulation record failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimError::TickOutOfRange { tick: 12, first: 0, last: 10 };
        assert_eq!(err.to_string(), "tick 12 is out of range 0 - 10");

        let err = SimError::CacheFull(42);
        assert_eq!(err.to_string(), "cache is full at tick 42");
    }

    #[test]
    fn test_json_error_converts() {
        let bad = serde_json::from_str::<Vec<f64>>("not json").unwrap_err();
        let err: SimError = bad.into();
        assert!(matches!(err, SimError::Json(_)));
    }
}
