// src/shared_data.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Simulator-assigned vehicle identifier (e.g. `amb1`, `flow_north.3`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub String);

impl VehicleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Traffic direction served by one signal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    NS,
    EW,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::NS => Direction::EW,
            Direction::EW => Direction::NS,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::NS => f.write_str("NS"),
            Direction::EW => f.write_str("EW"),
        }
    }
}

/// Cardinal side of the intersection a segment attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Approach {
    North,
    South,
    East,
    West,
}

impl Approach {
    pub fn direction(self) -> Direction {
        match self {
            Approach::North | Approach::South => Direction::NS,
            Approach::East | Approach::West => Direction::EW,
        }
    }
}

/// The possible states for one lane group's signal head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightState {
    Green,
    Yellow,
    Red,
}

impl LightState {
    /// Single-character form used in indication strings (`G`, `y`, `r`).
    pub fn as_char(self) -> char {
        match self {
            LightState::Green => 'G',
            LightState::Yellow => 'y',
            LightState::Red => 'r',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'G' | 'g' => Some(LightState::Green),
            'Y' | 'y' => Some(LightState::Yellow),
            'R' | 'r' => Some(LightState::Red),
            _ => None,
        }
    }
}

/// Per-tick, read-only view of one vehicle as reported by the telemetry source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub id: VehicleId,
    pub kind: String,
    /// Empty while the vehicle is between segments.
    pub road_segment_id: String,
    pub lane_position_m: f64,
    pub lane_id: String,
}

/// A priority vehicle inside the detection zone, recomputed every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproachCandidate {
    pub vehicle_id: VehicleId,
    pub direction: Direction,
    pub distance_to_intersection_m: f64,
}

/// One-shot instruction for the signal actuator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalCommand {
    /// Indication per lane group, in topology order.
    pub per_group: Vec<(String, LightState)>,
    pub duration_s: f64,
}

impl SignalCommand {
    /// Renders the indication as one character per lane group, e.g. `GrGr`.
    pub fn indication(&self) -> String {
        self.per_group.iter().map(|(_, state)| state.as_char()).collect()
    }

    pub fn state_of(&self, group: &str) -> Option<LightState> {
        self.per_group
            .iter()
            .find(|(id, _)| id == group)
            .map(|(_, state)| *state)
    }
}

/// Wall-clock seconds since the Unix epoch, used to stamp exported records.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
