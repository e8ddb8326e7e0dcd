use serde::{Deserialize, Serialize};

use crate::control_system::passage::OverrideEnd;
use crate::shared_data::{ApproachCandidate, Direction, VehicleId};

/// Observable happenings of the priority controller, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    Configured {
        intersection_id: String,
        detection_distance_m: f64,
        override_duration_s: f64,
        clearance_duration_s: f64,
        normal_green_s: f64,
    },
    CandidateDetected {
        time_s: f64,
        candidate: ApproachCandidate,
    },
    /// A vehicle could not be read for a reason other than having left.
    TelemetryFault {
        time_s: f64,
        vehicle_id: VehicleId,
        reason: String,
    },
    OverrideActivated {
        time_s: f64,
        vehicle_id: VehicleId,
        direction: Direction,
        indication: String,
        duration_s: f64,
    },
    OverrideEnded {
        time_s: f64,
        vehicle_id: VehicleId,
        direction: Direction,
        reason: OverrideEnd,
        elapsed_s: f64,
    },
    ClearanceIssued {
        time_s: f64,
        previous_direction: Direction,
        indication: String,
        duration_s: f64,
    },
    NormalResumed {
        time_s: f64,
        direction: Direction,
        indication: String,
        duration_s: f64,
    },
    Status {
        time_s: f64,
        step: u64,
        override_active: bool,
        phase: Option<usize>,
        phase_name: Option<String>,
        vehicles: usize,
    },
    Finished {
        time_s: f64,
        steps: u64,
        processed_vehicles: usize,
        overrides_activated: u64,
    },
}

impl ControllerEvent {
    /// Short snake_case tag, matching the serialized `event` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerEvent::Configured { .. } => "configured",
            ControllerEvent::CandidateDetected { .. } => "candidate_detected",
            ControllerEvent::TelemetryFault { .. } => "telemetry_fault",
            ControllerEvent::OverrideActivated { .. } => "override_activated",
            ControllerEvent::OverrideEnded { .. } => "override_ended",
            ControllerEvent::ClearanceIssued { .. } => "clearance_issued",
            ControllerEvent::NormalResumed { .. } => "normal_resumed",
            ControllerEvent::Status { .. } => "status",
            ControllerEvent::Finished { .. } => "finished",
        }
    }

    pub fn time_s(&self) -> Option<f64> {
        match self {
            ControllerEvent::Configured { .. } => None,
            ControllerEvent::CandidateDetected { time_s, .. }
            | ControllerEvent::TelemetryFault { time_s, .. }
            | ControllerEvent::OverrideActivated { time_s, .. }
            | ControllerEvent::OverrideEnded { time_s, .. }
            | ControllerEvent::ClearanceIssued { time_s, .. }
            | ControllerEvent::NormalResumed { time_s, .. }
            | ControllerEvent::Status { time_s, .. }
            | ControllerEvent::Finished { time_s, .. } => Some(*time_s),
        }
    }
}

/// Consumer of the controller's event stream.
pub trait EventSink {
    fn emit(&mut self, event: &ControllerEvent);
}

/// Collects events in memory.
impl EventSink for Vec<ControllerEvent> {
    fn emit(&mut self, event: &ControllerEvent) {
        self.push(event.clone());
    }
}

impl<T: EventSink + ?Sized> EventSink for Box<T> {
    fn emit(&mut self, event: &ControllerEvent) {
        (**self).emit(event);
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Default)]
pub struct Fanout {
    sinks: Vec<Box<dyn EventSink + Send>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for Fanout {
    fn emit(&mut self, event: &ControllerEvent) {
        for sink in self.sinks.iter_mut() {
            sink.emit(event);
        }
    }
}
