//! Error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gridlet::GridletStatus;
use crate::reservation::ReservationStatus;

/// Invalid operation on a gridlet.
#[derive(Debug, Error, PartialEq)]
pub enum GridletError {
    #[error("gridlet {gridlet_id} cannot change status from {from:?} to {to:?}")]
    InvalidTransition {
        gridlet_id: u64,
        from: GridletStatus,
        to: GridletStatus,
    },
}

/// Reason for rejecting a reservation request.
///
/// Sent back to the requester inside reply events, hence serializable.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum ReservationError {
    #[error("resource does not support advance reservation")]
    NotSupported,
    #[error("reservation start time {start_time} is in the past (now {now})")]
    StartInPast { start_time: f64, now: f64 },
    #[error("reservation duration must be positive, got {duration}")]
    InvalidDuration { duration: f64 },
    #[error("reservation must request at least one PE")]
    NoPes,
    #[error("requested {requested} PEs but resource has only {total}")]
    TooManyPes { requested: u32, total: u32 },
    #[error("only {available} of {requested} PEs are free in the requested window")]
    Busy { requested: u32, available: u32 },
    #[error("reservation {id} not found")]
    NotFound { id: u64 },
    #[error("reservation {id} belongs to another user")]
    NotOwner { id: u64 },
    #[error("reservation {id} is {status:?}")]
    InvalidStatus { id: u64, status: ReservationStatus },
}

/// Failure to load simulation configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("can't parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
