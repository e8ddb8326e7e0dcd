use log::Level;

use crate::communication::messages::{ControllerEvent, EventSink};

/// Renders controller events through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

/// Level and human-readable line for one event.
pub fn describe(event: &ControllerEvent) -> (Level, String) {
    match event {
        ControllerEvent::Configured {
            intersection_id,
            detection_distance_m,
            override_duration_s,
            clearance_duration_s,
            normal_green_s,
        } => (
            Level::Info,
            format!(
                "Priority controller started at '{}': detection {} m, override {}s, clearance {}s, resume green {}s",
                intersection_id,
                detection_distance_m,
                override_duration_s,
                clearance_duration_s,
                normal_green_s
            ),
        ),
        ControllerEvent::CandidateDetected { time_s, candidate } => (
            Level::Debug,
            format!(
                "[{:.1}s] Priority vehicle {} is {:.1} m out on the {} approach",
                time_s, candidate.vehicle_id, candidate.distance_to_intersection_m, candidate.direction
            ),
        ),
        ControllerEvent::TelemetryFault {
            time_s,
            vehicle_id,
            reason,
        } => (
            Level::Warn,
            format!("[{:.1}s] Skipping vehicle {}: {}", time_s, vehicle_id, reason),
        ),
        ControllerEvent::OverrideActivated {
            time_s,
            vehicle_id,
            direction,
            indication,
            duration_s,
        } => (
            Level::Info,
            format!(
                "[{:.1}s] Priority override for {}: {} green ({}) for {}s",
                time_s, vehicle_id, direction, indication, duration_s
            ),
        ),
        ControllerEvent::OverrideEnded {
            time_s,
            vehicle_id,
            direction,
            reason,
            elapsed_s,
        } => (
            Level::Info,
            format!(
                "[{:.1}s] Override for {} on {} ended after {:.1}s: {}",
                time_s,
                vehicle_id,
                direction,
                elapsed_s,
                reason.describe()
            ),
        ),
        ControllerEvent::ClearanceIssued {
            time_s,
            previous_direction,
            indication,
            duration_s,
        } => (
            Level::Info,
            format!(
                "[{:.1}s] Clearance after {} override: {} for {}s",
                time_s, previous_direction, indication, duration_s
            ),
        ),
        ControllerEvent::NormalResumed {
            time_s,
            direction,
            indication,
            duration_s,
        } => (
            Level::Info,
            format!(
                "[{:.1}s] Normal operation resumed: {} green ({}) for {}s",
                time_s, direction, indication, duration_s
            ),
        ),
        ControllerEvent::Status {
            time_s,
            step,
            override_active,
            phase,
            phase_name,
            vehicles,
        } => {
            let phase = match (phase, phase_name) {
                (Some(p), Some(name)) => format!("{} ({})", p, name),
                (Some(p), None) => p.to_string(),
                _ => "unknown".to_string(),
            };
            let mode = if *override_active { "OVERRIDE" } else { "NORMAL" };
            (
                Level::Info,
                format!(
                    "[{:.1}s] step {} | phase {} | vehicles {} | {}",
                    time_s, step, phase, vehicles, mode
                ),
            )
        }
        ControllerEvent::Finished {
            time_s,
            steps,
            processed_vehicles,
            overrides_activated,
        } => (
            Level::Info,
            format!(
                "Simulation finished at {:.1}s after {} steps: {} priority vehicles processed, {} overrides",
                time_s, steps, processed_vehicles, overrides_activated
            ),
        ),
    }
}

impl EventSink for LogSink {
    fn emit(&mut self, event: &ControllerEvent) {
        let (level, line) = describe(event);
        log::log!(level, "{}", line);
    }
}
