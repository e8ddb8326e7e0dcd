//! Priority controller state machine and the loop that drives it.
//!
//! `PriorityPolicy::evaluate_tick` is the whole decision step: it takes the
//! current `ControllerState` and one `TelemetryFrame` and returns the next
//! state together with the signal commands and events the tick produced. The
//! `PriorityController` loop owns the backend, captures frames, applies the
//! commands and forwards events; it holds no decision logic of its own.

use serde::Serialize;
use std::collections::HashSet;

use crate::communication::messages::{ControllerEvent, EventSink};
use crate::communication::telemetry::{SimulationBackend, TelemetryFrame};
use crate::config::ControllerSettings;
use crate::control_system::arbiter::select_candidate;
use crate::control_system::detection::detect_candidates;
use crate::control_system::passage::{check_override_end, TIME_EPSILON};
use crate::control_system::signal_commander::SignalCommander;
use crate::control_system::topology::Topology;
use crate::error::ControllerError;
use crate::shared_data::{Direction, SignalCommand, VehicleId};

/// The vehicle currently holding the signal.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveOverride {
    pub vehicle_id: VehicleId,
    pub direction: Direction,
    pub activated_at_s: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Mode {
    #[default]
    Normal,
    Override(ActiveOverride),
}

/// Green owed to the direction that waited out an override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingResume {
    pub direction: Direction,
    pub due_s: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ControllerState {
    mode: Mode,
    processed: HashSet<VehicleId>,
    pending_resume: Option<PendingResume>,
    overrides_activated: u64,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn is_override(&self) -> bool {
        matches!(self.mode, Mode::Override(_))
    }

    pub fn active(&self) -> Option<&ActiveOverride> {
        match &self.mode {
            Mode::Override(active) => Some(active),
            Mode::Normal => None,
        }
    }

    pub fn active_vehicle_id(&self) -> Option<&VehicleId> {
        self.active().map(|a| &a.vehicle_id)
    }

    pub fn active_direction(&self) -> Option<Direction> {
        self.active().map(|a| a.direction)
    }

    pub fn activation_time_s(&self) -> Option<f64> {
        self.active().map(|a| a.activated_at_s)
    }

    /// Ids that have been served; only ever grows.
    pub fn processed(&self) -> &HashSet<VehicleId> {
        &self.processed
    }

    pub fn pending_resume(&self) -> Option<PendingResume> {
        self.pending_resume
    }

    pub fn overrides_activated(&self) -> u64 {
        self.overrides_activated
    }
}

/// What one tick decided.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub state: ControllerState,
    pub commands: Vec<SignalCommand>,
    pub events: Vec<ControllerEvent>,
}

/// Static inputs to the decision step.
#[derive(Debug, Clone)]
pub struct PriorityPolicy {
    topology: Topology,
    settings: ControllerSettings,
    commander: SignalCommander,
}

impl PriorityPolicy {
    pub fn new(intersection_id: &str, topology: Topology, settings: ControllerSettings) -> Self {
        let commander = SignalCommander::new(intersection_id, &topology, &settings);
        Self {
            topology,
            settings,
            commander,
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn commander(&self) -> &SignalCommander {
        &self.commander
    }

    pub fn evaluate_tick(&self, mut state: ControllerState, frame: &TelemetryFrame) -> TickOutcome {
        let now = frame.sim_time;
        let mut commands = Vec::new();
        let mut events = Vec::new();

        let ended = match &state.mode {
            Mode::Override(active) => check_override_end(
                active,
                frame,
                &self.topology,
                self.settings.override_duration_s,
            )
            .map(|reason| (active.clone(), reason)),
            Mode::Normal => None,
        };

        if let Some((active, reason)) = ended {
            events.push(ControllerEvent::OverrideEnded {
                time_s: now,
                vehicle_id: active.vehicle_id.clone(),
                direction: active.direction,
                reason,
                elapsed_s: now - active.activated_at_s,
            });
            state.processed.insert(active.vehicle_id);
            state.mode = Mode::Normal;

            let clearance = self.commander.clearance(active.direction);
            events.push(ControllerEvent::ClearanceIssued {
                time_s: now,
                previous_direction: active.direction,
                indication: clearance.indication(),
                duration_s: clearance.duration_s,
            });
            commands.push(clearance);
            state.pending_resume = Some(PendingResume {
                direction: active.direction.opposite(),
                due_s: now + self.settings.clearance_duration_s,
            });
        }

        if state.is_override() {
            return TickOutcome {
                state,
                commands,
                events,
            };
        }

        if let Some(pending) = state.pending_resume {
            if now + TIME_EPSILON >= pending.due_s {
                // resume() takes the direction that was just served
                let resume = self.commander.resume(pending.direction.opposite());
                events.push(ControllerEvent::NormalResumed {
                    time_s: now,
                    direction: pending.direction,
                    indication: resume.indication(),
                    duration_s: resume.duration_s,
                });
                commands.push(resume);
                state.pending_resume = None;
            }
        }

        let candidates = detect_candidates(
            frame,
            &state.processed,
            &self.topology,
            &self.settings,
            &mut events,
        );
        if let Some(chosen) = select_candidate(&candidates) {
            let activation = self.commander.activation(chosen.direction);
            events.push(ControllerEvent::OverrideActivated {
                time_s: now,
                vehicle_id: chosen.vehicle_id.clone(),
                direction: chosen.direction,
                indication: activation.indication(),
                duration_s: activation.duration_s,
            });
            commands.push(activation);
            state.mode = Mode::Override(ActiveOverride {
                vehicle_id: chosen.vehicle_id.clone(),
                direction: chosen.direction,
                activated_at_s: now,
            });
            // the override supersedes any owed resume
            state.pending_resume = None;
            state.overrides_activated += 1;
        }

        TickOutcome {
            state,
            commands,
            events,
        }
    }
}

/// Totals reported when the run ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub steps: u64,
    pub final_time_s: f64,
    pub processed_vehicles: Vec<VehicleId>,
    pub overrides_activated: u64,
}

/// Drives a backend tick by tick until it expects no more vehicles.
pub struct PriorityController<B, E> {
    backend: B,
    policy: PriorityPolicy,
    state: ControllerState,
    sink: E,
    step: u64,
}

impl<B: SimulationBackend, E: EventSink> PriorityController<B, E> {
    pub fn new(backend: B, policy: PriorityPolicy, sink: E) -> Self {
        Self {
            backend,
            policy,
            state: ControllerState::new(),
            sink,
            step: 0,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn sink(&self) -> &E {
        &self.sink
    }

    pub fn into_parts(self) -> (B, E) {
        (self.backend, self.sink)
    }

    /// Runs to completion. Actuation and enumeration failures abort the run.
    pub fn run(&mut self) -> Result<RunSummary, ControllerError> {
        let settings = self.policy.settings();
        self.sink.emit(&ControllerEvent::Configured {
            intersection_id: self.policy.commander().intersection_id().to_string(),
            detection_distance_m: settings.detection_distance_m,
            override_duration_s: settings.override_duration_s,
            clearance_duration_s: settings.clearance_duration_s,
            normal_green_s: settings.normal_green_s,
        });

        while self
            .backend
            .min_expected_vehicles()
            .map_err(ControllerError::Telemetry)?
            > 0
        {
            self.tick()?;
        }

        let final_time_s = self
            .backend
            .sim_time()
            .map_err(ControllerError::Telemetry)?;
        let mut processed: Vec<VehicleId> = self.state.processed().iter().cloned().collect();
        processed.sort();
        let summary = RunSummary {
            steps: self.step,
            final_time_s,
            processed_vehicles: processed,
            overrides_activated: self.state.overrides_activated(),
        };
        self.sink.emit(&ControllerEvent::Finished {
            time_s: final_time_s,
            steps: summary.steps,
            processed_vehicles: summary.processed_vehicles.len(),
            overrides_activated: summary.overrides_activated,
        });
        Ok(summary)
    }

    /// One step: advance, capture, decide, report, actuate.
    pub fn tick(&mut self) -> Result<(), ControllerError> {
        self.backend.step().map_err(ControllerError::Telemetry)?;
        self.step += 1;
        let frame = TelemetryFrame::capture(&self.backend).map_err(ControllerError::Telemetry)?;

        let state = std::mem::take(&mut self.state);
        let outcome = self.policy.evaluate_tick(state, &frame);
        self.state = outcome.state;

        // events first, so a failed actuation still leaves its transition on record
        for event in &outcome.events {
            self.sink.emit(event);
        }
        for command in &outcome.commands {
            self.policy.commander().issue(&mut self.backend, command)?;
        }

        let interval = self.policy.settings().status_interval_steps;
        if interval > 0 && self.step % interval == 0 {
            self.report_status(&frame);
        }
        Ok(())
    }

    fn report_status(&mut self, frame: &TelemetryFrame) {
        let intersection = self.policy.commander().intersection_id();
        // diagnostics only: a failed read-back is not worth stopping for
        let phase = self.backend.current_phase(intersection).ok();
        let phase_name = phase.and_then(|p| self.backend.phase_name(intersection, p));
        self.sink.emit(&ControllerEvent::Status {
            time_s: frame.sim_time,
            step: self.step,
            override_active: self.state.is_override(),
            phase,
            phase_name,
            vehicles: frame.vehicle_count(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::CROSSROADS;
    use crate::config::Scenario;
    use crate::control_system::detection::tests::snapshot;
    use crate::control_system::passage::OverrideEnd;

    fn policy() -> PriorityPolicy {
        let scenario = Scenario::from_json(CROSSROADS).unwrap();
        PriorityPolicy::new(
            "center",
            scenario.topology().unwrap(),
            ControllerSettings::default(),
        )
    }

    fn frame(time: f64, vehicles: &[(&str, &str, &str, f64)]) -> TelemetryFrame {
        vehicles
            .iter()
            .fold(TelemetryFrame::new(time), |f, (id, kind, road, pos)| {
                f.with_vehicle(snapshot(id, kind, road, *pos), 100.0)
            })
    }

    #[test]
    fn starts_normal_with_nothing_processed() {
        let state = ControllerState::new();
        assert_eq!(state.mode(), &Mode::Normal);
        assert!(state.active_vehicle_id().is_none());
        assert!(state.processed().is_empty());
    }

    #[test]
    fn activation_records_the_closest_candidate() {
        let p = policy();
        let out = p.evaluate_tick(
            ControllerState::new(),
            &frame(
                7.0,
                &[
                    ("a", "emergency", "north_in", 60.0),
                    ("b", "emergency", "east_in", 90.0),
                    ("c", "emergency", "south_in", 75.0),
                ],
            ),
        );
        assert_eq!(out.state.active_vehicle_id(), Some(&VehicleId::from("b")));
        assert_eq!(out.state.active_direction(), Some(Direction::EW));
        assert_eq!(out.state.activation_time_s(), Some(7.0));
        assert_eq!(out.commands.len(), 1);
        assert_eq!(out.commands[0].indication(), "rGrG");
        assert_eq!(out.state.overrides_activated(), 1);
    }

    #[test]
    fn override_is_not_re_evaluated_for_new_candidates() {
        let p = policy();
        let out = p.evaluate_tick(
            ControllerState::new(),
            &frame(1.0, &[("a", "emergency", "north_in", 60.0)]),
        );
        let out = p.evaluate_tick(
            out.state,
            &frame(
                1.1,
                &[
                    ("a", "emergency", "north_in", 61.0),
                    ("b", "emergency", "east_in", 99.0),
                ],
            ),
        );
        assert_eq!(out.state.active_vehicle_id(), Some(&VehicleId::from("a")));
        assert!(out.commands.is_empty());
        assert!(out.events.is_empty());
    }

    #[test]
    fn passage_releases_and_schedules_resume() {
        let p = policy();
        let out = p.evaluate_tick(
            ControllerState::new(),
            &frame(1.0, &[("amb1", "emergency", "north_in", 55.0)]),
        );
        let out = p.evaluate_tick(
            out.state,
            &frame(1.1, &[("amb1", "emergency", "north_out", 1.0)]),
        );
        assert_eq!(out.state.mode(), &Mode::Normal);
        assert!(out.state.processed().contains(&VehicleId::from("amb1")));
        assert_eq!(out.commands.len(), 1);
        assert_eq!(out.commands[0].indication(), "ryry");
        let pending = out.state.pending_resume().unwrap();
        assert_eq!(pending.direction, Direction::EW);
        assert!((pending.due_s - 3.1).abs() < 1e-9);
        assert!(matches!(
            &out.events[0],
            ControllerEvent::OverrideEnded {
                reason: OverrideEnd::Passed { .. },
                ..
            }
        ));

        // clearance still running
        let out = p.evaluate_tick(out.state, &frame(2.0, &[]));
        assert!(out.commands.is_empty());

        let out = p.evaluate_tick(out.state, &frame(3.1, &[]));
        assert_eq!(out.commands.len(), 1);
        assert_eq!(out.commands[0].indication(), "rGrG");
        assert!(out.state.pending_resume().is_none());
        assert_eq!(out.events[0].kind(), "normal_resumed");
    }

    #[test]
    fn new_override_preempts_pending_resume() {
        let p = policy();
        let out = p.evaluate_tick(
            ControllerState::new(),
            &frame(1.0, &[("amb1", "emergency", "north_in", 55.0)]),
        );
        let out = p.evaluate_tick(out.state, &frame(1.1, &[]));
        assert!(out.state.pending_resume().is_some());
        let out = p.evaluate_tick(
            out.state,
            &frame(1.2, &[("amb2", "emergency", "west_in", 80.0)]),
        );
        assert_eq!(out.state.active_vehicle_id(), Some(&VehicleId::from("amb2")));
        assert!(out.state.pending_resume().is_none());
    }

    #[test]
    fn release_and_next_activation_can_share_a_tick() {
        let p = policy();
        let out = p.evaluate_tick(
            ControllerState::new(),
            &frame(
                1.0,
                &[
                    ("amb1", "emergency", "north_in", 90.0),
                    ("amb2", "emergency", "west_in", 60.0),
                ],
            ),
        );
        assert_eq!(out.state.active_vehicle_id(), Some(&VehicleId::from("amb1")));
        let out = p.evaluate_tick(
            out.state,
            &frame(
                1.1,
                &[
                    ("amb1", "emergency", ":center_0", 2.0),
                    ("amb2", "emergency", "west_in", 61.0),
                ],
            ),
        );
        assert_eq!(out.state.active_vehicle_id(), Some(&VehicleId::from("amb1")));

        let out = p.evaluate_tick(
            out.state,
            &frame(
                1.2,
                &[
                    ("amb1", "emergency", "south_out", 1.0),
                    ("amb2", "emergency", "west_in", 62.0),
                ],
            ),
        );
        assert_eq!(out.state.active_vehicle_id(), Some(&VehicleId::from("amb2")));
        let indications: Vec<String> = out.commands.iter().map(|c| c.indication()).collect();
        assert_eq!(indications, ["ryry", "rGrG"]);
    }

    #[test]
    fn served_vehicle_never_triggers_again() {
        let p = policy();
        let mut state = ControllerState::new();
        let script = [
            frame(1.0, &[("amb1", "emergency", "north_in", 55.0)]),
            frame(1.1, &[("amb1", "emergency", "north_out", 1.0)]),
            frame(1.2, &[("amb1", "emergency", "north_in", 90.0)]),
            frame(1.3, &[("amb1", "emergency", "east_in", 99.0)]),
        ];
        let mut activations = 0;
        for f in &script {
            let out = p.evaluate_tick(state, f);
            activations += out
                .events
                .iter()
                .filter(|e| e.kind() == "override_activated")
                .count();
            state = out.state;
        }
        assert_eq!(activations, 1);
        assert_eq!(state.mode(), &Mode::Normal);
    }
}
