use crate::control_system::topology::Topology;
use crate::shared_data::VehicleId;

/// Different types of vehicles in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleType {
    Car,
    Bus,
    Truck,
    EmergencyVan,
}

impl VehicleType {
    pub fn from_kind(kind: &str, priority_kind: &str) -> Self {
        match kind {
            k if k == priority_kind => VehicleType::EmergencyVan,
            "bus" => VehicleType::Bus,
            "truck" => VehicleType::Truck,
            _ => VehicleType::Car,
        }
    }

    pub fn length(self) -> f64 {
        match self {
            VehicleType::Car => 4.5,
            VehicleType::Bus => 12.0,
            VehicleType::Truck => 16.0,
            VehicleType::EmergencyVan => 5.5,
        }
    }
}

/// A vehicle travelling incoming segment → junction → outgoing segment.
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub id: VehicleId,
    pub kind: String,
    pub vehicle_type: VehicleType,
    pub speed: f64,
    pub length: f64,
    pub is_priority: bool,
    /// Segments to traverse, in order.
    pub route: Vec<String>,
    pub route_index: usize,
    pub lane_index: usize,
    /// Front bumper position along the current lane, in meters.
    pub position: f64,
    /// Set when the vehicle made no real progress on the last step.
    pub stopped: bool,
    pub waiting_time: f64,
}

impl Vehicle {
    pub fn new(
        id: VehicleId,
        kind: &str,
        priority_kind: &str,
        speed: f64,
        route: Vec<String>,
        lane_index: usize,
    ) -> Self {
        let vehicle_type = VehicleType::from_kind(kind, priority_kind);
        Self {
            id,
            kind: kind.to_string(),
            vehicle_type,
            speed,
            length: vehicle_type.length(),
            is_priority: vehicle_type == VehicleType::EmergencyVan,
            route,
            route_index: 0,
            lane_index,
            position: 0.0,
            stopped: false,
            waiting_time: 0.0,
        }
    }

    pub fn segment(&self) -> &str {
        &self.route[self.route_index]
    }

    pub fn next_segment(&self) -> Option<&str> {
        self.route.get(self.route_index + 1).map(String::as_str)
    }

    pub fn lane_id(&self) -> String {
        Topology::lane_id(self.segment(), self.lane_index)
    }

    /// Rear bumper position along the current lane.
    pub fn tail(&self) -> f64 {
        self.position - self.length
    }
}
