use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::communication::telemetry::{SignalActuator, TelemetrySource};
use crate::config::{FlowConfig, Scenario};
use crate::control_system::topology::{SegmentRole, Topology};
use crate::error::{
    ActuationError, ActuationResult, ConfigError, TelemetryError, TelemetryResult,
};
use crate::monitoring::visualizer::{FrameRecorder, Scene, SceneSignal, SceneVehicle};
use crate::shared_data::{LightState, VehicleId};
use crate::simulation_engine::intersection::{parse_indication, IntersectionController};
use crate::simulation_engine::lanes::{create_lanes, Lane};
use crate::simulation_engine::vehicles::Vehicle;

const EPSILON: f64 = 1e-9;

/// How the simulator presents itself while running.
#[derive(Debug, Clone)]
pub enum Backend {
    Headless,
    /// Writes a PNG frame of the junction every `every_steps` steps.
    Visual { frames_dir: PathBuf, every_steps: u64 },
}

#[derive(Debug, Clone)]
struct Departure {
    id: VehicleId,
    kind: String,
    from: String,
    to: String,
    speed: f64,
    depart_s: f64,
}

/// A discrete-time micro-simulation of one signalized junction.
///
/// Vehicles follow `incoming -> internal -> outgoing` routes, keep a minimum
/// gap to the vehicle ahead and stop at the line while their lane group shows
/// red. The signal runs its cyclic program unless an explicit indication has
/// been set through [`SignalActuator`].
#[derive(Debug)]
pub struct Simulation {
    intersection_id: String,
    topology: Topology,
    lanes: HashMap<String, Lane>,
    signal: IntersectionController,
    vehicles: Vec<Vehicle>,
    pending: Vec<Departure>,
    flows: Vec<FlowConfig>,
    flow_counters: Vec<u64>,
    rng: StdRng,
    priority_kind: String,
    step_length: f64,
    end_time: f64,
    min_gap: f64,
    steps: u64,
    internal_segment: Option<String>,
    arrived: usize,
    recorder: Option<FrameRecorder>,
}

impl Simulation {
    pub fn new(scenario: &Scenario, topology: Topology, backend: Backend) -> Result<Self, ConfigError> {
        let signal = IntersectionController::from_config(
            &scenario.intersection_id,
            &scenario.program,
            &topology,
            scenario.controller.normal_green_s,
        )?;
        let lanes: HashMap<String, Lane> = create_lanes(&topology)
            .into_iter()
            .map(|lane| (lane.id.clone(), lane))
            .collect();

        let mut internal: Vec<&str> = topology
            .segment_ids()
            .filter(|s| topology.role(s) == Some(SegmentRole::Internal))
            .collect();
        internal.sort_unstable();
        let internal_segment = internal.first().map(|s| s.to_string());

        let sim = &scenario.simulation;
        let mut pending: Vec<Departure> = sim
            .vehicles
            .iter()
            .map(|v| Departure {
                id: VehicleId::new(&v.id),
                kind: v.kind.clone(),
                from: v.from.clone(),
                to: v.to.clone(),
                speed: v.speed_mps,
                depart_s: v.depart_s,
            })
            .collect();
        pending.sort_by(|a, b| a.depart_s.total_cmp(&b.depart_s));

        let recorder = match backend {
            Backend::Headless => None,
            Backend::Visual {
                frames_dir,
                every_steps,
            } => Some(FrameRecorder::new(&frames_dir, every_steps).map_err(|source| {
                ConfigError::Io {
                    path: frames_dir.clone(),
                    source,
                }
            })?),
        };

        log::info!(
            "Simulation ready: {} lanes, {} scheduled vehicles, {} flows, step {}s",
            lanes.len(),
            pending.len(),
            sim.flows.len(),
            sim.step_length_s
        );

        Ok(Self {
            intersection_id: scenario.intersection_id.clone(),
            topology,
            lanes,
            signal,
            vehicles: Vec::new(),
            pending,
            flows: sim.flows.clone(),
            flow_counters: vec![0; sim.flows.len()],
            rng: StdRng::seed_from_u64(sim.seed),
            priority_kind: scenario.controller.priority_kind.clone(),
            step_length: sim.step_length_s,
            end_time: sim.end_time_s,
            min_gap: sim.min_gap_m,
            steps: 0,
            internal_segment,
            arrived: 0,
            recorder,
        })
    }

    pub fn time(&self) -> f64 {
        self.steps as f64 * self.step_length
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn signal(&self) -> &IntersectionController {
        &self.signal
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Vehicles that reached the end of their route.
    pub fn arrived(&self) -> usize {
        self.arrived
    }

    pub fn lane(&self, lane_id: &str) -> Option<&Lane> {
        self.lanes.get(lane_id)
    }

    fn vehicle(&self, id: &VehicleId) -> TelemetryResult<&Vehicle> {
        self.vehicles
            .iter()
            .find(|v| &v.id == id)
            .ok_or_else(|| TelemetryError::VehicleAbsent(id.clone()))
    }

    fn flows_active(&self) -> bool {
        !self.flows.is_empty() && self.time() < self.end_time
    }

    fn check_intersection(&self, intersection_id: &str) -> ActuationResult<()> {
        if intersection_id == self.intersection_id {
            Ok(())
        } else {
            Err(ActuationError::UnknownIntersection(
                intersection_id.to_string(),
            ))
        }
    }

    fn advance(&mut self) {
        self.steps += 1;
        let now = self.time();
        self.spawn_flows(now);
        self.depart(now);
        // vehicles move under the indication that held when the step began; an
        // indication expiring now only takes effect from the next step
        self.move_vehicles();
        self.signal.update(self.step_length);

        if let Some(recorder) = &self.recorder {
            if recorder.should_render(self.steps) {
                if let Err(e) = recorder.render(&self.scene()) {
                    log::warn!("Could not render frame at step {}: {}", self.steps, e);
                }
            }
        }
    }

    fn spawn_flows(&mut self, now: f64) {
        if now >= self.end_time {
            return;
        }
        for (i, flow) in self.flows.iter().enumerate() {
            let p = (flow.rate_per_s * self.step_length).clamp(0.0, 1.0);
            if !self.rng.random_bool(p) {
                continue;
            }
            let kind = if self.rng.random_bool(flow.priority_share.clamp(0.0, 1.0)) {
                self.priority_kind.clone()
            } else {
                "passenger".to_string()
            };
            let id = VehicleId(format!("{}.{}", flow.id, self.flow_counters[i]));
            self.flow_counters[i] += 1;
            self.pending.push(Departure {
                id,
                kind,
                from: flow.from.clone(),
                to: flow.to.clone(),
                speed: flow.speed_mps,
                depart_s: now,
            });
        }
    }

    /// Inserts due departures; those without room at the entry retry next step.
    fn depart(&mut self, now: f64) {
        let mut waiting = Vec::new();
        for departure in std::mem::take(&mut self.pending) {
            if departure.depart_s > now + EPSILON || !self.try_insert(&departure) {
                waiting.push(departure);
            }
        }
        self.pending = waiting;
    }

    fn try_insert(&mut self, departure: &Departure) -> bool {
        let lanes = self
            .topology
            .segment(&departure.from)
            .map(|s| s.lanes)
            .unwrap_or(1);
        let lane_index = if lanes > 1 {
            self.rng.random_range(0..lanes)
        } else {
            0
        };
        let lane_id = Topology::lane_id(&departure.from, lane_index);
        if !self.lane_has_room(&lane_id, 0.0) {
            return false;
        }

        let mut route = vec![departure.from.clone()];
        route.extend(self.internal_segment.clone());
        route.push(departure.to.clone());
        let vehicle = Vehicle::new(
            departure.id.clone(),
            &departure.kind,
            &self.priority_kind,
            departure.speed,
            route,
            lane_index,
        );
        if let Some(lane) = self.lanes.get_mut(&lane_id) {
            lane.add_vehicle(&vehicle);
        }
        log::debug!(
            "{:?} {} departed on {} at {:.1}s",
            vehicle.vehicle_type,
            vehicle.id,
            lane_id,
            self.time()
        );
        self.vehicles.push(vehicle);
        true
    }

    /// True when a vehicle whose front is at `front` fits behind everything on the lane.
    fn lane_has_room(&self, lane_id: &str, front: f64) -> bool {
        self.vehicles
            .iter()
            .filter(|v| v.lane_id() == lane_id)
            .all(|v| v.tail() >= front + self.min_gap)
    }

    /// Whether a vehicle reaching the end of `segment` may enter what follows.
    /// Amber only lets through vehicles already moving at the line, which
    /// cannot stop within one step.
    fn may_cross(&self, segment: &str, stopped: bool) -> bool {
        if self.topology.role(segment) != Some(SegmentRole::Incoming) {
            return true;
        }
        let Some(group) = self.topology.group_index_of(segment) else {
            return true;
        };
        match self.signal.state_of_group(group) {
            Some(LightState::Red) => false,
            Some(LightState::Yellow) => !stopped,
            _ => true,
        }
    }

    fn move_vehicles(&mut self) {
        let dt = self.step_length;
        let keys: Vec<String> = self.vehicles.iter().map(Vehicle::lane_id).collect();
        let mut order: Vec<usize> = (0..self.vehicles.len()).collect();
        // front-most first within each lane
        order.sort_by(|&a, &b| {
            keys[a]
                .cmp(&keys[b])
                .then(self.vehicles[b].position.total_cmp(&self.vehicles[a].position))
        });

        let mut leader: Option<(&str, f64)> = None;
        let mut exited = Vec::new();
        for i in order {
            let lane_id = keys[i].as_str();
            let limit = match leader {
                Some((lane, tail)) if lane == lane_id => tail - self.min_gap,
                _ => f64::INFINITY,
            };
            let (position, speed, length, stopped) = {
                let v = &self.vehicles[i];
                (v.position, v.speed, v.length, v.stopped)
            };
            let lane_length = self.lanes.get(lane_id).map(|l| l.length_meters).unwrap_or(0.0);
            let mut target = (position + speed * dt).min(limit).max(position);

            let mut transfer = None;
            let mut leaves = false;
            if target > lane_length {
                if !self.may_cross(self.vehicles[i].segment(), stopped) {
                    target = lane_length.max(position);
                } else {
                    match self.vehicles[i].next_segment() {
                        None => leaves = true,
                        Some(next) => {
                            let next_lanes = self.topology.segment(next).map(|s| s.lanes).unwrap_or(1);
                            let next_index = self.vehicles[i].lane_index.min(next_lanes - 1);
                            let next_lane = Topology::lane_id(next, next_index);
                            let overflow = target - lane_length;
                            if self.lane_has_room(&next_lane, overflow) {
                                transfer = Some((next_lane, next_index, overflow));
                            } else {
                                target = lane_length;
                            }
                        }
                    }
                }
            }

            let travelled = target - position;
            let vehicle = &mut self.vehicles[i];
            vehicle.stopped = travelled < 0.1 * speed * dt;
            if vehicle.stopped {
                vehicle.waiting_time += dt;
            }
            if leaves || transfer.is_some() {
                if let Some(lane) = self.lanes.get_mut(lane_id) {
                    lane.remove_vehicle(vehicle);
                }
            }
            match transfer {
                Some((next_lane, next_index, overflow)) => {
                    vehicle.route_index += 1;
                    vehicle.lane_index = next_index;
                    vehicle.position = overflow;
                    if let Some(lane) = self.lanes.get_mut(&next_lane) {
                        lane.add_vehicle(vehicle);
                    }
                }
                None => vehicle.position = target,
            }
            if leaves {
                log::debug!(
                    "Vehicle {} arrived after waiting {:.1}s",
                    vehicle.id,
                    vehicle.waiting_time
                );
                exited.push(i);
            }
            // followers on the old lane still see the tail in old-lane coordinates
            leader = Some((lane_id, target - length));
        }

        if !exited.is_empty() {
            self.arrived += exited.len();
            let mut index = 0;
            self.vehicles.retain(|_| {
                let keep = !exited.contains(&index);
                index += 1;
                keep
            });
        }
    }

    /// Snapshot of the junction for the frame renderer.
    pub fn scene(&self) -> Scene {
        let vehicles = self
            .vehicles
            .iter()
            .map(|v| {
                let info = self.topology.segment(v.segment());
                let role = info.map(|i| i.role).unwrap_or(SegmentRole::Internal);
                let offset_m = match role {
                    SegmentRole::Incoming => {
                        (info.map(|i| i.length_m).unwrap_or(0.0) - v.position).max(0.0)
                    }
                    SegmentRole::Outgoing => v.position,
                    SegmentRole::Internal => 0.0,
                };
                SceneVehicle {
                    approach: info.and_then(|i| i.approach),
                    role,
                    offset_m,
                    is_priority: v.is_priority,
                }
            })
            .collect();

        let signals = self
            .topology
            .lane_groups()
            .iter()
            .enumerate()
            .flat_map(|(g, group)| {
                let state = self.signal.state_of_group(g).unwrap_or(LightState::Red);
                group.segments.iter().filter_map(move |seg| {
                    self.topology.segment(seg).and_then(|s| s.approach).map(|approach| {
                        SceneSignal { approach, state }
                    })
                })
            })
            .collect();

        let max_length_m = self
            .topology
            .segment_ids()
            .filter_map(|s| self.topology.segment(s))
            .map(|s| s.length_m)
            .fold(0.0, f64::max);

        let program = if self.signal.is_overridden() {
            "priority override"
        } else {
            self.signal
                .phase_name(self.signal.current_phase_index)
                .unwrap_or("-")
        };

        Scene {
            step: self.steps,
            time_s: self.time(),
            label: format!(
                "t={:.1}s  {}  vehicles={}",
                self.time(),
                program,
                self.vehicles.len()
            ),
            max_length_m,
            signals,
            vehicles,
        }
    }
}

impl TelemetrySource for Simulation {
    fn step(&mut self) -> TelemetryResult<()> {
        self.advance();
        Ok(())
    }

    fn sim_time(&self) -> TelemetryResult<f64> {
        Ok(self.time())
    }

    fn min_expected_vehicles(&self) -> TelemetryResult<usize> {
        Ok(self.vehicles.len() + self.pending.len() + usize::from(self.flows_active()))
    }

    fn vehicle_ids(&self) -> TelemetryResult<Vec<VehicleId>> {
        Ok(self.vehicles.iter().map(|v| v.id.clone()).collect())
    }

    fn vehicle_kind(&self, id: &VehicleId) -> TelemetryResult<String> {
        Ok(self.vehicle(id)?.kind.clone())
    }

    fn vehicle_road(&self, id: &VehicleId) -> TelemetryResult<String> {
        Ok(self.vehicle(id)?.segment().to_string())
    }

    fn vehicle_lane(&self, id: &VehicleId) -> TelemetryResult<String> {
        Ok(self.vehicle(id)?.lane_id())
    }

    fn vehicle_lane_position(&self, id: &VehicleId) -> TelemetryResult<f64> {
        Ok(self.vehicle(id)?.position)
    }

    fn lane_length(&self, lane_id: &str) -> TelemetryResult<f64> {
        self.lanes
            .get(lane_id)
            .map(|l| l.length_meters)
            .ok_or_else(|| TelemetryError::LaneAbsent(lane_id.to_string()))
    }
}

impl SignalActuator for Simulation {
    fn set_signal_indication(&mut self, intersection_id: &str, indication: &str) -> ActuationResult<()> {
        self.check_intersection(intersection_id)?;
        let states = parse_indication(indication, self.topology.lane_groups().len())?;
        self.signal.set_indication(states);
        Ok(())
    }

    fn set_override_duration(&mut self, intersection_id: &str, seconds: f64) -> ActuationResult<()> {
        self.check_intersection(intersection_id)?;
        self.signal.set_remaining(seconds)
    }

    fn current_phase(&self, intersection_id: &str) -> ActuationResult<usize> {
        self.check_intersection(intersection_id)?;
        Ok(self.signal.current_phase_index)
    }

    fn phase_name(&self, intersection_id: &str, phase: usize) -> Option<String> {
        self.check_intersection(intersection_id).ok()?;
        self.signal.phase_name(phase).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::CROSSROADS;
    use crate::config::ScheduledVehicle;

    fn scheduled(id: &str, depart_s: f64, from: &str, to: &str, speed_mps: f64) -> ScheduledVehicle {
        ScheduledVehicle {
            id: id.to_string(),
            kind: "passenger".to_string(),
            depart_s,
            from: from.to_string(),
            to: to.to_string(),
            speed_mps,
        }
    }

    fn simulation(vehicles: Vec<ScheduledVehicle>) -> Simulation {
        let mut scenario: Scenario = serde_json::from_str(CROSSROADS).unwrap();
        scenario.simulation.vehicles = vehicles;
        let topology = scenario.topology().unwrap();
        Simulation::new(&scenario, topology, Backend::Headless).unwrap()
    }

    fn run(sim: &mut Simulation, steps: usize) {
        for _ in 0..steps {
            sim.step().unwrap();
        }
    }

    #[test]
    fn vehicle_stops_at_red_line() {
        let mut sim = simulation(vec![scheduled("e1", 0.0, "east_in", "west_out", 10.0)]);
        run(&mut sim, 150);
        let id = VehicleId::new("e1");
        assert_eq!(sim.vehicle_road(&id).unwrap(), "east_in");
        assert!((sim.vehicle_lane_position(&id).unwrap() - 100.0).abs() < 1e-9);
        assert!(sim.vehicle(&id).unwrap().waiting_time > 0.0);
    }

    #[test]
    fn vehicle_crosses_on_green() {
        let mut sim = simulation(vec![scheduled("n1", 0.0, "north_in", "south_out", 10.0)]);
        run(&mut sim, 120);
        let road = sim.vehicle_road(&VehicleId::new("n1")).unwrap();
        assert_ne!(road, "north_in");
        assert_ne!(sim.topology().role(&road), Some(SegmentRole::Incoming));
    }

    #[test]
    fn followers_keep_their_gap() {
        let mut sim = simulation(vec![
            scheduled("e1", 0.0, "east_in", "west_out", 10.0),
            scheduled("e2", 1.0, "east_in", "west_out", 10.0),
        ]);
        run(&mut sim, 150);
        let lead = sim.vehicle(&VehicleId::new("e1")).unwrap();
        let follow = sim.vehicle(&VehicleId::new("e2")).unwrap();
        assert!(follow.position <= lead.tail() - sim.min_gap + 1e-9);
        let lane = sim.lane("east_in_0").unwrap();
        assert!((lane.current_vehicle_length - 9.0).abs() < 1e-9);
        assert!((lane.occupancy() - 0.09).abs() < 1e-9);
        assert!(!lane.has_priority_vehicle());
    }

    #[test]
    fn explicit_indication_releases_queued_traffic() {
        let mut sim = simulation(vec![scheduled("e1", 0.0, "east_in", "west_out", 10.0)]);
        run(&mut sim, 110);
        sim.set_signal_indication("center", "rGrG").unwrap();
        sim.set_override_duration("center", 10.0).unwrap();
        run(&mut sim, 5);
        let road = sim.vehicle_road(&VehicleId::new("e1")).unwrap();
        assert_ne!(road, "east_in");
        assert!(sim.signal().is_overridden());
    }

    #[test]
    fn absent_vehicles_and_lanes_are_reported_as_such() {
        let sim = simulation(Vec::new());
        let err = sim.vehicle_kind(&VehicleId::new("ghost")).unwrap_err();
        assert!(err.is_absent());
        let err = sim.lane_length("nowhere_0").unwrap_err();
        assert!(matches!(err, TelemetryError::LaneAbsent(_)));
        assert_eq!(sim.lane_length("north_in_0").unwrap(), 100.0);
    }

    #[test]
    fn actuation_is_checked() {
        let mut sim = simulation(Vec::new());
        assert_eq!(
            sim.set_signal_indication("elsewhere", "GrGr"),
            Err(ActuationError::UnknownIntersection("elsewhere".to_string()))
        );
        assert!(matches!(
            sim.set_signal_indication("center", "GrG"),
            Err(ActuationError::InvalidIndication { .. })
        ));
        assert!(sim.set_override_duration("center", -2.0).is_err());
        assert_eq!(sim.current_phase("center"), Ok(0));
        assert_eq!(sim.phase_name("center", 0).as_deref(), Some("NS Green"));
    }

    #[test]
    fn expected_vehicles_count_pending_departures() {
        let mut sim = simulation(vec![scheduled("n1", 5.0, "north_in", "south_out", 20.0)]);
        assert_eq!(sim.min_expected_vehicles().unwrap(), 1);
        assert!(sim.vehicle_ids().unwrap().is_empty());
        let mut guard = 0;
        while sim.min_expected_vehicles().unwrap() > 0 && guard < 1000 {
            sim.step().unwrap();
            guard += 1;
        }
        assert_eq!(sim.arrived(), 1);
        assert!(sim.time() < 20.0);
    }

    #[test]
    fn flows_are_reproducible_for_a_seed() {
        let build = || {
            let mut scenario: Scenario = serde_json::from_str(CROSSROADS).unwrap();
            scenario.simulation.end_time_s = 30.0;
            scenario.simulation.flows.push(FlowConfig {
                id: "ns".to_string(),
                from: "north_in".to_string(),
                to: "south_out".to_string(),
                rate_per_s: 0.5,
                priority_share: 0.2,
                speed_mps: 12.0,
            });
            let topology = scenario.topology().unwrap();
            Simulation::new(&scenario, topology, Backend::Headless).unwrap()
        };
        let (mut a, mut b) = (build(), build());
        run(&mut a, 200);
        run(&mut b, 200);
        assert_eq!(a.vehicle_ids().unwrap(), b.vehicle_ids().unwrap());
        assert!(a.min_expected_vehicles().unwrap() > 0);
    }
}
