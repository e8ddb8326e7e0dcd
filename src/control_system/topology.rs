use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::NetworkConfig;
use crate::error::ConfigError;
use crate::shared_data::{Approach, Direction};

/// How a road segment relates to the junction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentRole {
    /// Feeds the junction.
    Incoming,
    /// Leaves the junction.
    Outgoing,
    /// Inside the junction box.
    Internal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    pub role: SegmentRole,
    pub approach: Option<Approach>,
    pub length_m: f64,
    pub lanes: usize,
}

/// Lanes sharing one signal head.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneGroup {
    pub id: String,
    pub segments: Vec<String>,
    pub direction: Direction,
}

/// Static description of the intersection, built once from the scenario.
#[derive(Debug, Clone)]
pub struct Topology {
    segments: HashMap<String, SegmentInfo>,
    lane_groups: Vec<LaneGroup>,
}

impl Topology {
    pub fn from_network(network: &NetworkConfig) -> Result<Self, ConfigError> {
        let mut segments = HashMap::new();
        for seg in &network.segments {
            if seg.length_m <= 0.0 || seg.lanes == 0 {
                return Err(ConfigError::InvalidNetwork(format!(
                    "segment '{}' needs a positive length and at least one lane",
                    seg.id
                )));
            }
            let info = SegmentInfo {
                role: seg.role,
                approach: seg.approach,
                length_m: seg.length_m,
                lanes: seg.lanes,
            };
            if segments.insert(seg.id.clone(), info).is_some() {
                return Err(ConfigError::InvalidNetwork(format!(
                    "duplicate segment '{}'",
                    seg.id
                )));
            }
        }

        if network.lane_groups.is_empty() {
            return Err(ConfigError::InvalidNetwork(
                "at least one lane group is required".to_string(),
            ));
        }

        let mut lane_groups = Vec::with_capacity(network.lane_groups.len());
        for group in &network.lane_groups {
            let mut direction = None;
            for seg_id in &group.segments {
                let seg_direction = segments
                    .get(seg_id)
                    .filter(|s| s.role == SegmentRole::Incoming)
                    .and_then(|s| s.approach)
                    .map(Approach::direction)
                    .ok_or_else(|| {
                        ConfigError::InvalidNetwork(format!(
                            "lane group '{}' references '{}', which is not a mapped incoming segment",
                            group.id, seg_id
                        ))
                    })?;
                if direction.is_some_and(|d| d != seg_direction) {
                    return Err(ConfigError::InvalidNetwork(format!(
                        "lane group '{}' mixes NS and EW approaches",
                        group.id
                    )));
                }
                direction = Some(seg_direction);
            }
            let direction = direction.ok_or_else(|| {
                ConfigError::InvalidNetwork(format!("lane group '{}' has no segments", group.id))
            })?;
            lane_groups.push(LaneGroup {
                id: group.id.clone(),
                segments: group.segments.clone(),
                direction,
            });
        }

        Ok(Self {
            segments,
            lane_groups,
        })
    }

    pub fn segment(&self, id: &str) -> Option<&SegmentInfo> {
        self.segments.get(id)
    }

    pub fn segment_ids(&self) -> impl Iterator<Item = &str> {
        self.segments.keys().map(String::as_str)
    }

    pub fn role(&self, id: &str) -> Option<SegmentRole> {
        self.segments.get(id).map(|s| s.role)
    }

    /// Direction of an incoming approach; `None` for every other segment,
    /// including incoming segments with no cardinal mapping.
    pub fn approach_direction(&self, id: &str) -> Option<Direction> {
        self.segments
            .get(id)
            .filter(|s| s.role == SegmentRole::Incoming)
            .and_then(|s| s.approach)
            .map(Approach::direction)
    }

    pub fn lane_groups(&self) -> &[LaneGroup] {
        &self.lane_groups
    }

    /// Index of the lane group that signals the given incoming segment.
    pub fn group_index_of(&self, segment: &str) -> Option<usize> {
        self.lane_groups
            .iter()
            .position(|g| g.segments.iter().any(|s| s == segment))
    }

    /// Lane ids follow the `<segment>_<index>` convention.
    pub fn lane_id(segment: &str, index: usize) -> String {
        format!("{}_{}", segment, index)
    }
}
