use std::collections::{HashMap, HashSet};

use crate::error::{ActuationResult, TelemetryError, TelemetryResult};
use crate::shared_data::{VehicleId, VehicleSnapshot};

/// Read side of the simulator: one query per field, any of which may miss.
pub trait TelemetrySource {
    /// Advances the simulation by one discrete step.
    fn step(&mut self) -> TelemetryResult<()>;
    fn sim_time(&self) -> TelemetryResult<f64>;
    /// Vehicles still in the network plus those yet to depart.
    fn min_expected_vehicles(&self) -> TelemetryResult<usize>;
    fn vehicle_ids(&self) -> TelemetryResult<Vec<VehicleId>>;
    fn vehicle_kind(&self, id: &VehicleId) -> TelemetryResult<String>;
    fn vehicle_road(&self, id: &VehicleId) -> TelemetryResult<String>;
    fn vehicle_lane(&self, id: &VehicleId) -> TelemetryResult<String>;
    fn vehicle_lane_position(&self, id: &VehicleId) -> TelemetryResult<f64>;
    fn lane_length(&self, lane_id: &str) -> TelemetryResult<f64>;
}

/// Write side of the simulator, addressed by intersection id.
pub trait SignalActuator {
    /// Explicit indication, one character per lane group (`G`, `y`, `r`).
    fn set_signal_indication(&mut self, intersection_id: &str, indication: &str)
        -> ActuationResult<()>;
    fn set_override_duration(&mut self, intersection_id: &str, seconds: f64)
        -> ActuationResult<()>;
    fn current_phase(&self, intersection_id: &str) -> ActuationResult<usize>;

    fn phase_name(&self, _intersection_id: &str, _phase: usize) -> Option<String> {
        None
    }
}

/// Anything the controller loop can drive: telemetry in, signal commands out.
pub trait SimulationBackend: TelemetrySource + SignalActuator {}

impl<T: TelemetrySource + SignalActuator> SimulationBackend for T {}

#[derive(Debug, Clone, PartialEq)]
pub enum VehicleReading {
    Available(VehicleSnapshot),
    Unavailable(TelemetryError),
}

/// Everything the monitors may look at during one tick, captured once.
#[derive(Debug, Clone, Default)]
pub struct TelemetryFrame {
    pub sim_time: f64,
    readings: Vec<(VehicleId, VehicleReading)>,
    live: HashSet<VehicleId>,
    lane_lengths: HashMap<String, TelemetryResult<f64>>,
}

impl TelemetryFrame {
    pub fn new(sim_time: f64) -> Self {
        Self {
            sim_time,
            ..Self::default()
        }
    }

    /// Queries the source once for every live vehicle. Per-vehicle misses are
    /// recorded in the frame; failing to enumerate vehicles is not.
    pub fn capture<S: TelemetrySource + ?Sized>(source: &S) -> TelemetryResult<Self> {
        let mut frame = Self::new(source.sim_time()?);
        for id in source.vehicle_ids()? {
            match read_vehicle(source, &id) {
                Ok(snapshot) => {
                    if !frame.lane_lengths.contains_key(&snapshot.lane_id) {
                        let length = source.lane_length(&snapshot.lane_id);
                        frame.lane_lengths.insert(snapshot.lane_id.clone(), length);
                    }
                    frame.push(id, VehicleReading::Available(snapshot));
                }
                Err(e) => frame.push(id, VehicleReading::Unavailable(e)),
            }
        }
        Ok(frame)
    }

    pub fn with_vehicle(mut self, snapshot: VehicleSnapshot, lane_length: f64) -> Self {
        self.lane_lengths
            .insert(snapshot.lane_id.clone(), Ok(lane_length));
        self.with_snapshot(snapshot)
    }

    /// Adds a reading whose lane length query failed.
    pub fn with_lane_fault(mut self, snapshot: VehicleSnapshot, error: TelemetryError) -> Self {
        self.lane_lengths.insert(snapshot.lane_id.clone(), Err(error));
        self.with_snapshot(snapshot)
    }

    /// Adds a reading whose lane length the source could not report.
    pub fn with_snapshot(mut self, snapshot: VehicleSnapshot) -> Self {
        let id = snapshot.id.clone();
        self.push(id, VehicleReading::Available(snapshot));
        self
    }

    pub fn with_unavailable(mut self, id: VehicleId, error: TelemetryError) -> Self {
        self.push(id, VehicleReading::Unavailable(error));
        self
    }

    fn push(&mut self, id: VehicleId, reading: VehicleReading) {
        self.live.insert(id.clone());
        self.readings.push((id, reading));
    }

    /// Readings in the source's enumeration order.
    pub fn readings(&self) -> impl Iterator<Item = (&VehicleId, &VehicleReading)> {
        self.readings.iter().map(|(id, r)| (id, r))
    }

    pub fn reading(&self, id: &VehicleId) -> Option<&VehicleReading> {
        self.readings
            .iter()
            .find(|(vid, _)| vid == id)
            .map(|(_, r)| r)
    }

    pub fn is_live(&self, id: &VehicleId) -> bool {
        self.live.contains(id)
    }

    pub fn vehicle_count(&self) -> usize {
        self.readings.len()
    }

    pub fn lane_length(&self, lane_id: &str) -> Option<f64> {
        self.lane_lengths.get(lane_id)?.as_ref().ok().copied()
    }

    /// The stored lane length query, failures included. `None` if never asked.
    pub fn lane_length_reading(&self, lane_id: &str) -> Option<&TelemetryResult<f64>> {
        self.lane_lengths.get(lane_id)
    }
}

fn read_vehicle<S: TelemetrySource + ?Sized>(
    source: &S,
    id: &VehicleId,
) -> TelemetryResult<VehicleSnapshot> {
    Ok(VehicleSnapshot {
        id: id.clone(),
        kind: source.vehicle_kind(id)?,
        road_segment_id: source.vehicle_road(id)?,
        lane_position_m: source.vehicle_lane_position(id)?,
        lane_id: source.vehicle_lane(id)?,
    })
}
