use approx::assert_abs_diff_eq;
use signal_priority::communication::messages::ControllerEvent;
use signal_priority::communication::telemetry::{SignalActuator, TelemetrySource};
use signal_priority::config::Scenario;
use signal_priority::control_system::controller::{PriorityController, PriorityPolicy};
use signal_priority::control_system::passage::OverrideEnd;
use signal_priority::error::{ActuationError, ActuationResult, TelemetryError, TelemetryResult};
use signal_priority::shared_data::VehicleId;
use signal_priority::simulation_engine::simulation::{Backend, Simulation};

const NETWORK: &str = r#"
    "intersection_id": "center",
    "network": {
        "segments": [
            {"id": "north_in", "role": "incoming", "approach": "north", "length_m": 100.0},
            {"id": "east_in", "role": "incoming", "approach": "east", "length_m": 100.0},
            {"id": "south_in", "role": "incoming", "approach": "south", "length_m": 100.0},
            {"id": "west_in", "role": "incoming", "approach": "west", "length_m": 100.0},
            {"id": "north_out", "role": "outgoing", "approach": "north", "length_m": 100.0},
            {"id": "east_out", "role": "outgoing", "approach": "east", "length_m": 100.0},
            {"id": "south_out", "role": "outgoing", "approach": "south", "length_m": 100.0},
            {"id": "west_out", "role": "outgoing", "approach": "west", "length_m": 100.0},
            {"id": ":center_0", "role": "internal", "length_m": 15.0}
        ],
        "lane_groups": [
            {"id": "north", "segments": ["north_in"]},
            {"id": "east", "segments": ["east_in"]},
            {"id": "south", "segments": ["south_in"]},
            {"id": "west", "segments": ["west_in"]}
        ]
    }
"#;

fn scenario(simulation: &str) -> Scenario {
    let raw = format!("{{ {}, \"simulation\": {} }}", NETWORK, simulation);
    Scenario::from_json(&raw).unwrap()
}

type Sighting = (&'static str, &'static str, &'static str, f64);

/// Replays a fixed list of frames and records every actuation.
struct ScriptedBackend {
    script: Vec<Vec<Sighting>>,
    tick: usize,
    indications: Vec<(String, String)>,
    durations: Vec<f64>,
}

impl ScriptedBackend {
    fn new(script: Vec<Vec<Sighting>>) -> Self {
        Self {
            script,
            tick: 0,
            indications: Vec::new(),
            durations: Vec::new(),
        }
    }

    fn current(&self) -> &[Sighting] {
        match self.tick {
            0 => &[],
            t => &self.script[t - 1],
        }
    }

    fn find(&self, id: &VehicleId) -> TelemetryResult<&Sighting> {
        self.current()
            .iter()
            .find(|s| s.0 == id.as_str())
            .ok_or_else(|| TelemetryError::VehicleAbsent(id.clone()))
    }
}

impl TelemetrySource for ScriptedBackend {
    fn step(&mut self) -> TelemetryResult<()> {
        self.tick += 1;
        Ok(())
    }
    fn sim_time(&self) -> TelemetryResult<f64> {
        Ok(self.tick as f64 * 0.1)
    }
    fn min_expected_vehicles(&self) -> TelemetryResult<usize> {
        Ok(self.script.len() - self.tick)
    }
    fn vehicle_ids(&self) -> TelemetryResult<Vec<VehicleId>> {
        Ok(self.current().iter().map(|s| VehicleId::new(s.0)).collect())
    }
    fn vehicle_kind(&self, id: &VehicleId) -> TelemetryResult<String> {
        Ok(self.find(id)?.1.to_string())
    }
    fn vehicle_road(&self, id: &VehicleId) -> TelemetryResult<String> {
        Ok(self.find(id)?.2.to_string())
    }
    fn vehicle_lane(&self, id: &VehicleId) -> TelemetryResult<String> {
        Ok(format!("{}_0", self.find(id)?.2))
    }
    fn vehicle_lane_position(&self, id: &VehicleId) -> TelemetryResult<f64> {
        Ok(self.find(id)?.3)
    }
    fn lane_length(&self, _lane_id: &str) -> TelemetryResult<f64> {
        Ok(100.0)
    }
}

impl SignalActuator for ScriptedBackend {
    fn set_signal_indication(&mut self, intersection_id: &str, indication: &str) -> ActuationResult<()> {
        self.indications
            .push((intersection_id.to_string(), indication.to_string()));
        Ok(())
    }
    fn set_override_duration(&mut self, _intersection_id: &str, seconds: f64) -> ActuationResult<()> {
        self.durations.push(seconds);
        Ok(())
    }
    fn current_phase(&self, _intersection_id: &str) -> ActuationResult<usize> {
        Ok(0)
    }
}

fn scripted_controller(
    script: Vec<Vec<Sighting>>,
) -> PriorityController<ScriptedBackend, Vec<ControllerEvent>> {
    let scenario = scenario("{}");
    let policy = PriorityPolicy::new(
        &scenario.intersection_id,
        scenario.topology().unwrap(),
        scenario.controller.clone(),
    );
    PriorityController::new(ScriptedBackend::new(script), policy, Vec::new())
}

fn kinds(events: &[ControllerEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| e.kind())
        .filter(|k| *k != "status" && *k != "candidate_detected")
        .collect()
}

#[test]
fn ambulance_from_the_north_gets_green_then_clearance() {
    let mut script = vec![
        vec![("amb1", "emergency", "north_in", 55.0)],
        vec![("amb1", "emergency", "north_out", 1.0)],
    ];
    script.extend(std::iter::repeat_with(Vec::new).take(28));
    let mut controller = scripted_controller(script);
    let summary = controller.run().unwrap();

    assert_eq!(summary.steps, 30);
    assert_eq!(summary.processed_vehicles, vec![VehicleId::new("amb1")]);
    assert_eq!(summary.overrides_activated, 1);

    let (backend, events) = controller.into_parts();
    let indications: Vec<&str> = backend.indications.iter().map(|(_, i)| i.as_str()).collect();
    assert_eq!(indications, ["GrGr", "ryry", "rGrG"]);
    assert!(backend.indications.iter().all(|(id, _)| id == "center"));
    assert_eq!(backend.durations, [10.0, 2.0, 20.0]);

    assert_eq!(
        kinds(&events),
        [
            "configured",
            "override_activated",
            "override_ended",
            "clearance_issued",
            "normal_resumed",
            "finished"
        ]
    );
    let resumed_at = events
        .iter()
        .find(|e| e.kind() == "normal_resumed")
        .and_then(ControllerEvent::time_s)
        .unwrap();
    assert_abs_diff_eq!(resumed_at, 2.2, epsilon = 1e-9);
}

#[test]
fn stuck_ambulance_times_out_exactly_once() {
    let script = vec![vec![("amb1", "emergency", "north_in", 60.0)]; 150];
    let mut controller = scripted_controller(script);
    let summary = controller.run().unwrap();
    assert_eq!(summary.overrides_activated, 1);

    let (_, events) = controller.into_parts();
    let ended = events
        .iter()
        .find_map(|e| match e {
            ControllerEvent::OverrideEnded {
                time_s,
                reason,
                elapsed_s,
                ..
            } => Some((*time_s, reason.clone(), *elapsed_s)),
            _ => None,
        })
        .unwrap();
    assert_eq!(ended.1, OverrideEnd::Timeout);
    assert_abs_diff_eq!(ended.0, 10.1, epsilon = 1e-9);
    assert_abs_diff_eq!(ended.2, 10.0, epsilon = 1e-9);
}

#[test]
fn vanished_ambulance_releases_the_signal() {
    let mut script = vec![vec![("amb1", "emergency", "north_in", 55.0)]];
    script.extend(std::iter::repeat_with(Vec::new).take(5));
    let mut controller = scripted_controller(script);
    controller.run().unwrap();
    assert!(!controller.state().is_override());
    let reason = controller.sink().iter().find_map(|e| match e {
        ControllerEvent::OverrideEnded { reason, .. } => Some(reason.clone()),
        _ => None,
    });
    assert_eq!(reason, Some(OverrideEnd::LeftNetwork));
}

#[test]
fn actuation_failure_stops_the_run() {
    struct Refusing(ScriptedBackend);
    impl TelemetrySource for Refusing {
        fn step(&mut self) -> TelemetryResult<()> {
            self.0.step()
        }
        fn sim_time(&self) -> TelemetryResult<f64> {
            self.0.sim_time()
        }
        fn min_expected_vehicles(&self) -> TelemetryResult<usize> {
            self.0.min_expected_vehicles()
        }
        fn vehicle_ids(&self) -> TelemetryResult<Vec<VehicleId>> {
            self.0.vehicle_ids()
        }
        fn vehicle_kind(&self, id: &VehicleId) -> TelemetryResult<String> {
            self.0.vehicle_kind(id)
        }
        fn vehicle_road(&self, id: &VehicleId) -> TelemetryResult<String> {
            self.0.vehicle_road(id)
        }
        fn vehicle_lane(&self, id: &VehicleId) -> TelemetryResult<String> {
            self.0.vehicle_lane(id)
        }
        fn vehicle_lane_position(&self, id: &VehicleId) -> TelemetryResult<f64> {
            self.0.vehicle_lane_position(id)
        }
        fn lane_length(&self, lane_id: &str) -> TelemetryResult<f64> {
            self.0.lane_length(lane_id)
        }
    }
    impl SignalActuator for Refusing {
        fn set_signal_indication(&mut self, _: &str, _: &str) -> ActuationResult<()> {
            Err(ActuationError::Rejected("signal offline".to_string()))
        }
        fn set_override_duration(&mut self, _: &str, _: f64) -> ActuationResult<()> {
            Ok(())
        }
        fn current_phase(&self, _: &str) -> ActuationResult<usize> {
            Ok(0)
        }
    }

    let scenario = scenario("{}");
    let policy = PriorityPolicy::new(
        "center",
        scenario.topology().unwrap(),
        scenario.controller.clone(),
    );
    let backend = Refusing(ScriptedBackend::new(vec![
        vec![("amb1", "emergency", "north_in", 55.0)];
        3
    ]));
    let mut controller = PriorityController::new(backend, policy, Vec::new());
    let err = controller.run().unwrap_err();
    assert!(err.to_string().contains("signal offline"));
    // the transition that could not be applied is still on record
    assert_eq!(kinds(controller.sink()), ["configured", "override_activated"]);
}

#[test]
fn ordinary_traffic_never_triggers_an_override() {
    let scenario = scenario(
        r#"{
            "end_time_s": 40.0,
            "seed": 7,
            "flows": [
                {"id": "ns", "from": "north_in", "to": "south_out", "rate_per_s": 0.3},
                {"id": "ew", "from": "east_in", "to": "west_out", "rate_per_s": 0.3}
            ]
        }"#,
    );
    let topology = scenario.topology().unwrap();
    let simulation = Simulation::new(&scenario, topology.clone(), Backend::Headless).unwrap();
    let policy = PriorityPolicy::new("center", topology, scenario.controller.clone());
    let mut controller = PriorityController::new(simulation, policy, Vec::new());
    let summary = controller.run().unwrap();

    assert!(summary.processed_vehicles.is_empty());
    assert_eq!(summary.overrides_activated, 0);
    assert!(summary.final_time_s >= 40.0);
    let events = controller.sink();
    assert!(events.iter().all(|e| !matches!(
        e,
        ControllerEvent::OverrideActivated { .. } | ControllerEvent::ClearanceIssued { .. }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, ControllerEvent::Status { override_active: false, .. })));
    assert!(controller.backend().arrived() > 0);
}

#[test]
fn simulated_ambulance_is_served_against_a_red_light() {
    // the routine program starts on NS green, so the east approach is red
    let scenario = scenario(
        r#"{
            "vehicles": [
                {"id": "amb1", "kind": "emergency", "depart_s": 0.0, "from": "east_in", "to": "west_out", "speed_mps": 13.9}
            ]
        }"#,
    );
    let topology = scenario.topology().unwrap();
    let simulation = Simulation::new(&scenario, topology.clone(), Backend::Headless).unwrap();
    let policy = PriorityPolicy::new("center", topology, scenario.controller.clone());
    let mut controller = PriorityController::new(simulation, policy, Vec::new());
    let summary = controller.run().unwrap();

    assert_eq!(summary.processed_vehicles, vec![VehicleId::new("amb1")]);
    assert_eq!(summary.overrides_activated, 1);
    assert_eq!(controller.backend().arrived(), 1);

    let events = controller.sink();
    assert_eq!(
        kinds(events),
        [
            "configured",
            "override_activated",
            "override_ended",
            "clearance_issued",
            "normal_resumed",
            "finished"
        ]
    );
    let activation = events
        .iter()
        .find_map(|e| match e {
            ControllerEvent::OverrideActivated { indication, .. } => Some(indication.as_str()),
            _ => None,
        })
        .unwrap();
    assert_eq!(activation, "rGrG");
    assert!(events.iter().any(|e| matches!(
        e,
        ControllerEvent::OverrideEnded {
            reason: OverrideEnd::Passed { .. },
            ..
        }
    )));
}

#[test]
fn clearance_hands_straight_over_to_the_resumed_green() {
    let scenario = scenario(
        r#"{
            "vehicles": [
                {"id": "amb1", "kind": "emergency", "depart_s": 0.0, "from": "north_in", "to": "south_out", "speed_mps": 13.9}
            ]
        }"#,
    );
    let topology = scenario.topology().unwrap();
    let simulation = Simulation::new(&scenario, topology.clone(), Backend::Headless).unwrap();
    let policy = PriorityPolicy::new("center", topology, scenario.controller.clone());
    let mut controller = PriorityController::new(simulation, policy, Vec::new());

    // after each tick: the indication the next simulation step runs under
    let mut shown: Vec<String> = Vec::new();
    while controller.backend().min_expected_vehicles().unwrap() > 0 {
        controller.tick().unwrap();
        let states = controller.backend().signal().states();
        shown.push(states.iter().map(|s| s.as_char()).collect());
    }

    let start = shown.iter().position(|s| s.as_str() == "ryry").unwrap();
    assert_eq!(shown[start - 1], "GrGr");
    let clearance = shown[start..]
        .iter()
        .take_while(|s| s.as_str() == "ryry")
        .count();
    // 2 s of yellow at 0.1 s per step, then straight to the waiting direction
    assert_eq!(clearance, 20);
    assert_eq!(shown[start + clearance], "rGrG");
    assert!(controller
        .sink()
        .iter()
        .any(|e| matches!(e, ControllerEvent::NormalResumed { .. })));
}
