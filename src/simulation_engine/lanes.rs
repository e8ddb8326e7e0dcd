use crate::control_system::topology::{SegmentRole, Topology};
use crate::simulation_engine::vehicles::Vehicle;

/// One physical lane of a road segment.
#[derive(Debug, Clone)]
pub struct Lane {
    pub id: String,
    pub segment: String,
    pub role: SegmentRole,
    /// Length of the lane in meters.
    pub length_meters: f64,
    /// Current occupied vehicle length in meters.
    pub current_vehicle_length: f64,
    /// Priority vehicles currently on the lane.
    pub priority_vehicles: usize,
}

impl Lane {
    pub fn new(id: String, segment: String, role: SegmentRole, length_meters: f64) -> Self {
        Self {
            id,
            segment,
            role,
            length_meters,
            current_vehicle_length: 0.0,
            priority_vehicles: 0,
        }
    }

    pub fn add_vehicle(&mut self, vehicle: &Vehicle) {
        self.current_vehicle_length += vehicle.length;
        if vehicle.is_priority {
            self.priority_vehicles += 1;
        }
    }

    pub fn remove_vehicle(&mut self, vehicle: &Vehicle) {
        self.current_vehicle_length = (self.current_vehicle_length - vehicle.length).max(0.0);
        if vehicle.is_priority {
            self.priority_vehicles = self.priority_vehicles.saturating_sub(1);
        }
    }

    pub fn has_priority_vehicle(&self) -> bool {
        self.priority_vehicles > 0
    }

    pub fn occupancy(&self) -> f64 {
        (self.current_vehicle_length / self.length_meters).min(1.0)
    }
}

/// One lane per declared lane of every segment, ordered by id.
pub fn create_lanes(topology: &Topology) -> Vec<Lane> {
    let mut lanes: Vec<Lane> = topology
        .segment_ids()
        .filter_map(|seg| topology.segment(seg).map(|info| (seg, info)))
        .flat_map(|(seg, info)| {
            (0..info.lanes).map(move |i| {
                Lane::new(
                    Topology::lane_id(seg, i),
                    seg.to_string(),
                    info.role,
                    info.length_m,
                )
            })
        })
        .collect();
    lanes.sort_by(|a, b| a.id.cmp(&b.id));
    lanes
}
