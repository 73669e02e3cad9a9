//! Phase layout: the fixed, cyclic list of phase groups of one intersection.

use std::collections::BTreeMap;
use std::time::Duration;

use contracts::{IntersectionConfig, Lane};

use crate::EngineError;

/// Set of lanes that may be green together
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseGroup {
    pub name: String,
    pub lanes: Vec<Lane>,
    pub min_green: Duration,
    pub max_green: Duration,
}

impl PhaseGroup {
    pub fn new(name: impl Into<String>, lanes: Vec<Lane>, min_green: Duration, max_green: Duration) -> Self {
        Self {
            name: name.into(),
            lanes,
            min_green,
            max_green,
        }
    }

    pub fn contains(&self, lane: Lane) -> bool {
        self.lanes.contains(&lane)
    }
}

/// Validated phase groups in cyclic order
///
/// Distinct groups always conflict and never share a lane.
#[derive(Debug, Clone)]
pub struct PhaseLayout {
    groups: Vec<PhaseGroup>,
    lane_group: BTreeMap<Lane, usize>,
}

impl PhaseLayout {
    pub fn new(groups: Vec<PhaseGroup>) -> Result<Self, EngineError> {
        if groups.len() < 2 {
            return Err(EngineError::InvalidLayout(format!(
                "at least 2 phase groups required, got {}",
                groups.len()
            )));
        }

        let mut lane_group = BTreeMap::new();
        for (idx, group) in groups.iter().enumerate() {
            if group.lanes.is_empty() {
                return Err(EngineError::InvalidLayout(format!(
                    "phase group '{}' has no lanes",
                    group.name
                )));
            }
            if group.min_green > group.max_green {
                return Err(EngineError::InvalidLayout(format!(
                    "phase group '{}' min_green exceeds max_green",
                    group.name
                )));
            }
            for lane in &group.lanes {
                if let Some(prev) = lane_group.insert(*lane, idx) {
                    if prev != idx {
                        return Err(EngineError::InvalidLayout(format!(
                            "lane {} belongs to both '{}' and '{}'",
                            lane, groups[prev].name, group.name
                        )));
                    }
                }
            }
        }

        Ok(Self { groups, lane_group })
    }

    /// Build from one intersection's configuration.
    pub fn from_config(cfg: &IntersectionConfig) -> Result<Self, EngineError> {
        let groups = cfg
            .phase_groups
            .iter()
            .map(|g| {
                Ok(PhaseGroup::new(
                    g.name.clone(),
                    g.lanes.clone(),
                    seconds(g.min_green_s, "min_green_s")?,
                    seconds(g.max_green_s, "max_green_s")?,
                ))
            })
            .collect::<Result<Vec<_>, EngineError>>()?;
        Self::new(groups)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[PhaseGroup] {
        &self.groups
    }

    pub fn group(&self, idx: usize) -> Result<&PhaseGroup, EngineError> {
        self.groups.get(idx).ok_or(EngineError::UnknownGroup(idx))
    }

    /// Group index containing `lane`
    pub fn group_of(&self, lane: Lane) -> Option<usize> {
        self.lane_group.get(&lane).copied()
    }

    /// Lanes that belong to some group
    pub fn lanes(&self) -> impl Iterator<Item = (Lane, usize)> + '_ {
        self.lane_group.iter().map(|(l, g)| (*l, *g))
    }

    /// Index following `idx` in cyclic order
    pub fn next_index(&self, idx: usize) -> usize {
        (idx + 1) % self.groups.len()
    }
}

/// Seconds from configuration into a `Duration`.
pub(crate) fn seconds(value: f64, field: &str) -> Result<Duration, EngineError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| EngineError::InvalidLayout(format!("{field} = {value}: {e}")))
}
