use crate::communication::telemetry::SignalActuator;
use crate::config::ControllerSettings;
use crate::control_system::topology::Topology;
use crate::error::ActuationResult;
use crate::shared_data::{Direction, LightState, SignalCommand};

/// Turns a direction into explicit per-lane-group indications for one intersection.
#[derive(Debug, Clone)]
pub struct SignalCommander {
    intersection_id: String,
    groups: Vec<(String, Direction)>,
    override_duration_s: f64,
    clearance_duration_s: f64,
    normal_green_s: f64,
}

impl SignalCommander {
    pub fn new(intersection_id: &str, topology: &Topology, settings: &ControllerSettings) -> Self {
        Self {
            intersection_id: intersection_id.to_string(),
            groups: topology
                .lane_groups()
                .iter()
                .map(|g| (g.id.clone(), g.direction))
                .collect(),
            override_duration_s: settings.override_duration_s,
            clearance_duration_s: settings.clearance_duration_s,
            normal_green_s: settings.normal_green_s,
        }
    }

    pub fn intersection_id(&self) -> &str {
        &self.intersection_id
    }

    fn command(
        &self,
        duration_s: f64,
        state_for: impl Fn(Direction) -> LightState,
    ) -> SignalCommand {
        SignalCommand {
            per_group: self
                .groups
                .iter()
                .map(|(id, dir)| (id.clone(), state_for(*dir)))
                .collect(),
            duration_s,
        }
    }

    /// Green for every group on `direction`, red everywhere else.
    pub fn activation(&self, direction: Direction) -> SignalCommand {
        self.command(self.override_duration_s, |d| {
            if d == direction {
                LightState::Green
            } else {
                LightState::Red
            }
        })
    }

    /// The groups held red during the override go yellow; the served direction goes red.
    pub fn clearance(&self, previous: Direction) -> SignalCommand {
        self.command(self.clearance_duration_s, |d| {
            if d == previous {
                LightState::Red
            } else {
                LightState::Yellow
            }
        })
    }

    /// Green for the direction that waited out the override, for one routine green.
    pub fn resume(&self, previous: Direction) -> SignalCommand {
        self.command(self.normal_green_s, |d| {
            if d == previous {
                LightState::Red
            } else {
                LightState::Green
            }
        })
    }

    /// Applies the indication, then arms its duration. Re-issuing the same
    /// command only restarts the timer.
    pub fn issue<A: SignalActuator + ?Sized>(
        &self,
        actuator: &mut A,
        command: &SignalCommand,
    ) -> ActuationResult<()> {
        let indication = command.indication();
        actuator.set_signal_indication(&self.intersection_id, &indication)?;
        actuator.set_override_duration(&self.intersection_id, command.duration_s)?;

        let lanes_in = |state: LightState| -> Vec<&str> {
            command
                .per_group
                .iter()
                .filter(|(_, s)| *s == state)
                .map(|(id, _)| id.as_str())
                .collect()
        };
        log::debug!(
            "Intersection {} set to {} for {:.1}s: Green for lanes: {:?} and Red for lanes: {:?}",
            self.intersection_id,
            indication,
            command.duration_s,
            lanes_in(LightState::Green),
            lanes_in(LightState::Red)
        );
        Ok(())
    }
}
