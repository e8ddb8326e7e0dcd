use std::path::PathBuf;
use thiserror::Error;

use crate::shared_data::VehicleId;

/// Failures reading from the telemetry source.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelemetryError {
    /// The vehicle is no longer part of the simulation. Expected and recoverable.
    #[error("vehicle {0} is not in the simulation")]
    VehicleAbsent(VehicleId),

    #[error("lane {0} is not part of the network")]
    LaneAbsent(String),

    /// Anything else: the source could not answer right now.
    #[error("telemetry unavailable: {0}")]
    Unavailable(String),
}

impl TelemetryError {
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            TelemetryError::VehicleAbsent(_) | TelemetryError::LaneAbsent(_)
        )
    }
}

pub type TelemetryResult<T> = std::result::Result<T, TelemetryError>;

/// The signal could not be driven to the commanded state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActuationError {
    #[error("unknown intersection {0}")]
    UnknownIntersection(String),

    #[error("indication {indication:?} does not match {groups} lane groups")]
    InvalidIndication { indication: String, groups: usize },

    #[error("invalid override duration {0}")]
    InvalidDuration(String),

    #[error("actuator rejected command: {0}")]
    Rejected(String),
}

pub type ActuationResult<T> = std::result::Result<T, ActuationError>;

/// Startup preconditions: environment, scenario file, network description.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("please declare environment variable '{0}'")]
    MissingEnv(&'static str),

    #[error("{var} points to {path}, which is not a directory")]
    InvalidHome { var: &'static str, path: PathBuf },

    #[error("configuration file '{0}' not found")]
    ScenarioNotFound(PathBuf),

    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed scenario: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid network: {0}")]
    InvalidNetwork(String),
}

/// Errors that stop the controller loop.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("signal actuation failed: {0}")]
    Actuation(#[from] ActuationError),

    #[error("telemetry source failed: {0}")]
    Telemetry(TelemetryError),
}
