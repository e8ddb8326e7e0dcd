use crate::config::PhaseConfig;
use crate::control_system::topology::Topology;
use crate::error::{ActuationError, ActuationResult, ConfigError};
use crate::global_variables::NORMAL_YELLOW_S;
use crate::shared_data::{Direction, LightState};

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct TrafficLightPhase {
    pub name: String,
    /// One state per lane group.
    pub states: Vec<LightState>,
    pub duration: f64, // Duration in seconds
}

/// An indication forced from outside, held until its timer runs out.
#[derive(Debug, Clone, PartialEq)]
struct ExplicitIndication {
    states: Vec<LightState>,
    remaining: f64,
}

/// Signal head logic of the simulated junction: a cyclic program that an
/// explicit indication can temporarily replace.
#[derive(Debug, Clone)]
pub struct IntersectionController {
    pub id: String,
    pub phases: Vec<TrafficLightPhase>,
    pub current_phase_index: usize,
    pub remaining_in_phase: f64,
    explicit: Option<ExplicitIndication>,
}

/// Parses `GrGr`-style indications, one character per lane group.
pub fn parse_indication(indication: &str, groups: usize) -> ActuationResult<Vec<LightState>> {
    let states: Option<Vec<LightState>> = indication.chars().map(LightState::from_char).collect();
    match states {
        Some(states) if states.len() == groups => Ok(states),
        _ => Err(ActuationError::InvalidIndication {
            indication: indication.to_string(),
            groups,
        }),
    }
}

/// NS green, NS yellow, EW green, EW yellow, derived from the lane groups.
pub fn default_program(topology: &Topology, green_s: f64) -> Vec<TrafficLightPhase> {
    let phase = |name: &str, served: Direction, state: LightState, duration: f64| {
        TrafficLightPhase {
            name: name.to_string(),
            states: topology
                .lane_groups()
                .iter()
                .map(|g| if g.direction == served { state } else { LightState::Red })
                .collect(),
            duration,
        }
    };
    vec![
        phase("NS Green", Direction::NS, LightState::Green, green_s),
        phase("NS Yellow", Direction::NS, LightState::Yellow, NORMAL_YELLOW_S),
        phase("EW Green", Direction::EW, LightState::Green, green_s),
        phase("EW Yellow", Direction::EW, LightState::Yellow, NORMAL_YELLOW_S),
    ]
}

impl IntersectionController {
    pub fn new(id: &str, phases: Vec<TrafficLightPhase>) -> Self {
        let remaining_in_phase = phases.first().map(|p| p.duration).unwrap_or(0.0);
        Self {
            id: id.to_string(),
            phases,
            current_phase_index: 0,
            remaining_in_phase,
            explicit: None,
        }
    }

    /// Builds the routine program from the scenario, or derives one when none is given.
    pub fn from_config(
        id: &str,
        program: &[PhaseConfig],
        topology: &Topology,
        green_s: f64,
    ) -> Result<Self, ConfigError> {
        if program.is_empty() {
            return Ok(Self::new(id, default_program(topology, green_s)));
        }
        let groups = topology.lane_groups().len();
        let mut phases = Vec::with_capacity(program.len());
        for phase in program {
            let states = parse_indication(&phase.state, groups)
                .map_err(|e| ConfigError::InvalidNetwork(format!("phase '{}': {}", phase.name, e)))?;
            if phase.duration_s <= 0.0 {
                return Err(ConfigError::InvalidNetwork(format!(
                    "phase '{}' needs a positive duration",
                    phase.name
                )));
            }
            phases.push(TrafficLightPhase {
                name: phase.name.clone(),
                states,
                duration: phase.duration_s,
            });
        }
        Ok(Self::new(id, phases))
    }

    /// Advances the program clock, cycling phases or expiring an explicit indication.
    pub fn update(&mut self, dt: f64) {
        if let Some(explicit) = self.explicit.as_mut() {
            explicit.remaining -= dt;
            if explicit.remaining <= EPSILON {
                let expired = self.explicit.take().map(|e| e.states).unwrap_or_default();
                // a phase matching the forced state counts as served
                if let Some(served) = self.phases.iter().position(|p| p.states == expired) {
                    self.current_phase_index = (served + 1) % self.phases.len();
                }
                self.remaining_in_phase = self.phases[self.current_phase_index].duration;
                log::debug!(
                    "Intersection {} resuming program at phase {}",
                    self.id,
                    self.current_phase_index
                );
            }
            return;
        }

        self.remaining_in_phase -= dt;
        if self.remaining_in_phase <= EPSILON {
            self.current_phase_index = (self.current_phase_index + 1) % self.phases.len();
            self.remaining_in_phase = self.phases[self.current_phase_index].duration;
        }
    }

    /// Forces an indication. The same indication again leaves the timer alone.
    pub fn set_indication(&mut self, states: Vec<LightState>) {
        match self.explicit.as_mut() {
            Some(explicit) if explicit.states == states => {}
            Some(explicit) => explicit.states = states,
            None => {
                self.explicit = Some(ExplicitIndication {
                    states,
                    remaining: self.remaining_in_phase,
                })
            }
        }
    }

    /// Restarts the timer of whatever is showing now.
    pub fn set_remaining(&mut self, seconds: f64) -> ActuationResult<()> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ActuationError::InvalidDuration(seconds.to_string()));
        }
        match self.explicit.as_mut() {
            Some(explicit) => explicit.remaining = seconds,
            None => self.remaining_in_phase = seconds,
        }
        Ok(())
    }

    pub fn is_overridden(&self) -> bool {
        self.explicit.is_some()
    }

    pub fn states(&self) -> &[LightState] {
        match &self.explicit {
            Some(explicit) => &explicit.states,
            None => &self.phases[self.current_phase_index].states,
        }
    }

    pub fn state_of_group(&self, index: usize) -> Option<LightState> {
        self.states().get(index).copied()
    }

    pub fn phase_name(&self, index: usize) -> Option<&str> {
        self.phases.get(index).map(|p| p.name.as_str())
    }
}
