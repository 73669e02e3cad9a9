//! Lane and signal colour primitives

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Approach lane of an intersection.
///
/// The detector reports `up/down/left/right` zones; those are accepted as
/// aliases of the compass names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    #[serde(alias = "up")]
    North,
    #[serde(alias = "down")]
    South,
    #[serde(alias = "right")]
    East,
    #[serde(alias = "left")]
    West,
}

impl Lane {
    /// Every lane, in canonical order.
    pub const ALL: [Lane; 4] = [Lane::North, Lane::South, Lane::East, Lane::West];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::North => "north",
            Lane::South => "south",
            Lane::East => "east",
            Lane::West => "west",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable colour of a lane's signal head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalColor {
    Red,
    Yellow,
    Green,
}

impl fmt::Display for SignalColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalColor::Red => "red",
            SignalColor::Yellow => "yellow",
            SignalColor::Green => "green",
        })
    }
}

/// Per-lane aggregate rebuilt every aggregation cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneCount {
    pub vehicle_count: u32,
    pub has_emergency_vehicle: bool,
}

/// Counts for every lane. Always holds an entry per [`Lane::ALL`] member.
pub type LaneCounts = BTreeMap<Lane, LaneCount>;

/// Zero count for every lane.
pub fn empty_lane_counts() -> LaneCounts {
    Lane::ALL.iter().map(|l| (*l, LaneCount::default())).collect()
}

/// Total vehicles across the given lanes.
pub fn total_in(counts: &LaneCounts, lanes: &[Lane]) -> u32 {
    lanes
        .iter()
        .filter_map(|l| counts.get(l))
        .map(|c| c.vehicle_count)
        .sum()
}
