use std::collections::HashSet;

use crate::communication::messages::ControllerEvent;
use crate::communication::telemetry::{TelemetryFrame, VehicleReading};
use crate::config::ControllerSettings;
use crate::control_system::topology::Topology;
use crate::shared_data::{ApproachCandidate, VehicleId};

/// Scans the frame for unprocessed priority vehicles inside the detection zone.
///
/// Candidates come back in the frame's enumeration order, which the arbiter
/// relies on for tie-breaking. Vehicles on unmapped segments, on the internal
/// or outgoing segments, or whose lane length is unknown are skipped for this
/// tick only; nothing here marks a vehicle as processed. Failed queries other
/// than "no such vehicle/lane" are also reported as `TelemetryFault`.
pub fn detect_candidates(
    frame: &TelemetryFrame,
    processed: &HashSet<VehicleId>,
    topology: &Topology,
    settings: &ControllerSettings,
    events: &mut Vec<ControllerEvent>,
) -> Vec<ApproachCandidate> {
    let mut candidates = Vec::new();

    for (id, reading) in frame.readings() {
        if processed.contains(id) {
            continue;
        }
        let snapshot = match reading {
            VehicleReading::Available(snapshot) => snapshot,
            VehicleReading::Unavailable(e) if e.is_absent() => continue,
            VehicleReading::Unavailable(e) => {
                events.push(ControllerEvent::TelemetryFault {
                    time_s: frame.sim_time,
                    vehicle_id: id.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if snapshot.kind != settings.priority_kind {
            continue;
        }
        let Some(direction) = topology.approach_direction(&snapshot.road_segment_id) else {
            continue;
        };
        let lane_length = match frame.lane_length_reading(&snapshot.lane_id) {
            Some(Ok(length)) => *length,
            Some(Err(e)) if !e.is_absent() => {
                events.push(ControllerEvent::TelemetryFault {
                    time_s: frame.sim_time,
                    vehicle_id: id.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
            _ => continue,
        };

        let distance = lane_length - snapshot.lane_position_m;
        if distance <= settings.detection_distance_m {
            let candidate = ApproachCandidate {
                vehicle_id: id.clone(),
                direction,
                distance_to_intersection_m: distance,
            };
            events.push(ControllerEvent::CandidateDetected {
                time_s: frame.sim_time,
                candidate: candidate.clone(),
            });
            candidates.push(candidate);
        }
    }

    candidates
}
