use serde::{Deserialize, Serialize};

use crate::communication::telemetry::{TelemetryFrame, VehicleReading};
use crate::control_system::controller::ActiveOverride;
use crate::control_system::topology::{SegmentRole, Topology};
use crate::error::TelemetryError;

/// Slack for comparing accumulated simulation time against a deadline.
pub(crate) const TIME_EPSILON: f64 = 1e-6;

/// Why an override was released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum OverrideEnd {
    /// The vehicle exited the network or the simulation.
    LeftNetwork,
    /// The vehicle is past the junction.
    Passed { segment: String },
    /// Safety timeout, independent of where the vehicle is.
    Timeout,
    /// The vehicle could not be read; the override is released rather than held.
    TelemetryFailure { detail: String },
}

impl OverrideEnd {
    pub fn describe(&self) -> &'static str {
        match self {
            OverrideEnd::LeftNetwork => "vehicle left network",
            OverrideEnd::Passed { .. } => "vehicle passed",
            OverrideEnd::Timeout => "override timed out",
            OverrideEnd::TelemetryFailure { .. } => "telemetry failure",
        }
    }
}

/// Decides whether the active override should end on this tick.
pub fn check_override_end(
    active: &ActiveOverride,
    frame: &TelemetryFrame,
    topology: &Topology,
    override_duration_s: f64,
) -> Option<OverrideEnd> {
    if !frame.is_live(&active.vehicle_id) {
        return Some(OverrideEnd::LeftNetwork);
    }

    match frame.reading(&active.vehicle_id) {
        Some(VehicleReading::Available(snapshot)) => {
            let segment = &snapshot.road_segment_id;
            let passed = match topology.role(segment) {
                Some(SegmentRole::Outgoing) | None => true,
                Some(SegmentRole::Incoming) | Some(SegmentRole::Internal) => false,
            };
            if passed {
                return Some(OverrideEnd::Passed {
                    segment: segment.clone(),
                });
            }
        }
        Some(VehicleReading::Unavailable(TelemetryError::VehicleAbsent(_))) | None => {
            return Some(OverrideEnd::LeftNetwork);
        }
        Some(VehicleReading::Unavailable(e)) => {
            return Some(OverrideEnd::TelemetryFailure {
                detail: e.to_string(),
            });
        }
    }

    let elapsed = frame.sim_time - active.activated_at_s;
    if elapsed + TIME_EPSILON >= override_duration_s {
        return Some(OverrideEnd::Timeout);
    }
    None
}
