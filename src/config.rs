//! Scenario file loading and process preconditions.
//!
//! A scenario is a JSON document describing the intersection network, the
//! controller parameters, the routine signal program and the demo traffic.
//! Missing sections fall back to the constants in `global_variables`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::control_system::topology::{SegmentRole, Topology};
use crate::error::ConfigError;
use crate::global_variables::{
    CLEARANCE_DURATION_S, DEFAULT_INTERSECTION_ID, DEFAULT_PRIORITY_KIND, DETECTION_DISTANCE_M,
    MIN_GAP_M, NORMAL_GREEN_S, OVERRIDE_DURATION_S, SIM_HOME_ENV, STATUS_INTERVAL_STEPS,
    STEP_LENGTH_S,
};
use crate::shared_data::Approach;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_intersection_id")]
    pub intersection_id: String,
    pub network: NetworkConfig,
    #[serde(default)]
    pub controller: ControllerSettings,
    /// Routine cyclic program. Empty means a two-direction program is derived
    /// from the lane groups.
    #[serde(default)]
    pub program: Vec<PhaseConfig>,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub segments: Vec<SegmentConfig>,
    /// Signal heads in indication-string order.
    pub lane_groups: Vec<LaneGroupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub id: String,
    pub role: SegmentRole,
    #[serde(default)]
    pub approach: Option<Approach>,
    pub length_m: f64,
    #[serde(default = "default_lanes")]
    pub lanes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneGroupConfig {
    pub id: String,
    /// Incoming segments whose lanes share this group's indication.
    pub segments: Vec<String>,
}

/// Tunables of the priority controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub priority_kind: String,
    pub detection_distance_m: f64,
    pub override_duration_s: f64,
    pub clearance_duration_s: f64,
    /// Green granted to the opposite direction once the clearance elapses.
    pub normal_green_s: f64,
    /// Steps between status events; 0 turns them off.
    pub status_interval_steps: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            priority_kind: DEFAULT_PRIORITY_KIND.to_string(),
            detection_distance_m: DETECTION_DISTANCE_M,
            override_duration_s: OVERRIDE_DURATION_S,
            clearance_duration_s: CLEARANCE_DURATION_S,
            normal_green_s: NORMAL_GREEN_S,
            status_interval_steps: STATUS_INTERVAL_STEPS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub name: String,
    /// One character per lane group (`G`, `y`, `r`).
    pub state: String,
    pub duration_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub step_length_s: f64,
    /// Random flows stop spawning after this time; scheduled vehicles still depart.
    pub end_time_s: f64,
    pub seed: u64,
    pub min_gap_m: f64,
    pub vehicles: Vec<ScheduledVehicle>,
    pub flows: Vec<FlowConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step_length_s: STEP_LENGTH_S,
            end_time_s: 0.0,
            seed: 42,
            min_gap_m: MIN_GAP_M,
            vehicles: Vec::new(),
            flows: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledVehicle {
    pub id: String,
    pub kind: String,
    pub depart_s: f64,
    pub from: String,
    pub to: String,
    #[serde(default = "default_speed")]
    pub speed_mps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    pub id: String,
    pub from: String,
    pub to: String,
    /// Expected departures per second.
    pub rate_per_s: f64,
    /// Share of departures spawned with the priority kind.
    #[serde(default)]
    pub priority_share: f64,
    #[serde(default = "default_speed")]
    pub speed_mps: f64,
}

fn default_intersection_id() -> String {
    DEFAULT_INTERSECTION_ID.to_string()
}

fn default_lanes() -> usize {
    1
}

fn default_speed() -> f64 {
    13.9
}

impl Scenario {
    /// Reads and validates a scenario. A missing file is a precondition failure.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ScenarioNotFound(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let scenario = Self::from_json(&raw)?;
        log::info!(
            "Loaded scenario '{}' ({} segments, {} lane groups)",
            path.display(),
            scenario.network.segments.len(),
            scenario.network.lane_groups.len()
        );
        Ok(scenario)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let scenario: Scenario = serde_json::from_str(raw)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Builds the topology table; any inconsistency is reported as `InvalidNetwork`.
    pub fn topology(&self) -> Result<Topology, ConfigError> {
        Topology::from_network(&self.network)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let topology = self.topology()?;
        let c = &self.controller;
        if !(c.detection_distance_m >= 0.0 && c.detection_distance_m.is_finite())
            || !(c.override_duration_s > 0.0 && c.override_duration_s.is_finite())
        {
            return Err(ConfigError::InvalidNetwork(format!(
                "detection distance {} / override duration {} out of range",
                c.detection_distance_m, c.override_duration_s
            )));
        }
        // both durations are sent to the signal on every release
        if !(c.clearance_duration_s >= 0.0 && c.clearance_duration_s.is_finite())
            || !(c.normal_green_s > 0.0 && c.normal_green_s.is_finite())
        {
            return Err(ConfigError::InvalidNetwork(format!(
                "clearance {} / normal green {} out of range",
                c.clearance_duration_s, c.normal_green_s
            )));
        }
        if self.simulation.step_length_s <= 0.0 {
            return Err(ConfigError::InvalidNetwork(format!(
                "step length {} must be positive",
                self.simulation.step_length_s
            )));
        }
        for phase in &self.program {
            if phase.state.chars().count() != topology.lane_groups().len() {
                return Err(ConfigError::InvalidNetwork(format!(
                    "phase '{}' has {} signals for {} lane groups",
                    phase.name,
                    phase.state.chars().count(),
                    topology.lane_groups().len()
                )));
            }
        }
        let routes = self
            .simulation
            .vehicles
            .iter()
            .map(|v| (v.id.as_str(), v.from.as_str(), v.to.as_str()))
            .chain(
                self.simulation
                    .flows
                    .iter()
                    .map(|f| (f.id.as_str(), f.from.as_str(), f.to.as_str())),
            );
        for (id, from, to) in routes {
            if topology.role(from) != Some(SegmentRole::Incoming)
                || topology.role(to) != Some(SegmentRole::Outgoing)
            {
                return Err(ConfigError::InvalidNetwork(format!(
                    "route of '{}' must run from an incoming to an outgoing segment ({} -> {})",
                    id, from, to
                )));
            }
        }
        Ok(())
    }
}

/// Resolves the simulator home from the environment; it must name a directory.
pub fn sim_home() -> Result<PathBuf, ConfigError> {
    let raw = std::env::var_os(SIM_HOME_ENV).ok_or(ConfigError::MissingEnv(SIM_HOME_ENV))?;
    let path = PathBuf::from(raw);
    if !path.is_dir() {
        return Err(ConfigError::InvalidHome {
            var: SIM_HOME_ENV,
            path,
        });
    }
    Ok(path)
}
