//! Supported core topologies and their hotplug band tables
//!
//! Each topology owns an ordered band table. Bands are mutually exclusive and
//! deliberately leave gaps: a temperature that falls between bands matches
//! nothing and leaves the current core configuration untouched.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{GovernorError, Result};

/// Index of a logical CPU
pub type CoreIndex = usize;

/// Sensor reading in whole degrees Celsius
pub type Temperature = i32;

/// The core subject to the operator permission gate
pub const CORE0: CoreIndex = 0;

/// A temperature range a band applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempRange {
    /// `t > limit`
    Above(Temperature),
    /// `above < t <= up_to`
    Within { above: Temperature, up_to: Temperature },
    /// `t == value`
    Exactly(Temperature),
}

impl TempRange {
    pub fn contains(&self, t: Temperature) -> bool {
        match *self {
            TempRange::Above(limit) => t > limit,
            TempRange::Within { above, up_to } => t > above && t <= up_to,
            TempRange::Exactly(value) => t == value,
        }
    }
}

/// One instruction in a band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Up(CoreIndex),
    Down(CoreIndex),
    /// Core 0 goes down if the operator granted permission, up otherwise
    Core0,
    /// Every core in the topology comes online
    AllUp,
}

/// A temperature range mapped to a hotplug configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub range: TempRange,
    pub steps: &'static [Step],
}

use Step::{AllUp, Core0, Down, Up};

const QUAD_BANDS: &[Band] = &[
    Band { range: TempRange::Above(80), steps: &[Down(3), Down(2), Down(1)] },
    Band { range: TempRange::Within { above: 70, up_to: 75 }, steps: &[Up(1), Down(3), Down(2)] },
    Band { range: TempRange::Within { above: 60, up_to: 65 }, steps: &[Up(2), Down(3)] },
    Band { range: TempRange::Exactly(55), steps: &[AllUp] },
];

const HEXA_BANDS: &[Band] = &[
    Band {
        range: TempRange::Above(80),
        steps: &[Up(2), Up(3), Down(1), Core0, Down(5), Down(4)],
    },
    Band {
        range: TempRange::Within { above: 55, up_to: 65 },
        steps: &[Up(2), Up(3), Up(4), Up(5), Down(1), Core0],
    },
    Band { range: TempRange::Exactly(50), steps: &[AllUp] },
];

const OCTA_BANDS: &[Band] = &[
    Band {
        range: TempRange::Above(80),
        steps: &[Down(3), Down(2), Down(1), Core0, Down(7), Down(6)],
    },
    Band {
        range: TempRange::Within { above: 55, up_to: 65 },
        steps: &[Up(6), Up(7), Down(3), Down(2), Down(1), Core0],
    },
    Band {
        range: TempRange::Within { above: 45, up_to: 50 },
        steps: &[Up(0), Up(1), Down(3), Down(2)],
    },
    Band { range: TempRange::Exactly(40), steps: &[AllUp] },
];

/// Core topology the governor was bound to at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// 4 uniform cores, no core 0 gate
    Quad,
    /// 6 cores, big.LITTLE
    Hexa,
    /// 8 cores, big.LITTLE
    Octa,
}

impl Topology {
    pub const ALL: [Topology; 3] = [Topology::Quad, Topology::Hexa, Topology::Octa];

    pub fn from_core_count(count: usize) -> Option<Self> {
        match count {
            4 => Some(Topology::Quad),
            6 => Some(Topology::Hexa),
            8 => Some(Topology::Octa),
            _ => None,
        }
    }

    pub fn core_count(self) -> usize {
        match self {
            Topology::Quad => 4,
            Topology::Hexa => 6,
            Topology::Octa => 8,
        }
    }

    /// Core indices in ascending order
    pub fn cores(self) -> impl Iterator<Item = CoreIndex> {
        0..self.core_count()
    }

    pub fn contains(self, core: CoreIndex) -> bool {
        core < self.core_count()
    }

    /// Whether core 0 may only go offline with operator permission
    pub fn gates_core0(self) -> bool {
        !matches!(self, Topology::Quad)
    }

    /// Hotplug decisions are off by default on uniform quad-core parts
    pub fn default_hotplug_enabled(self) -> bool {
        !matches!(self, Topology::Quad)
    }

    pub fn bands(self) -> &'static [Band] {
        match self {
            Topology::Quad => QUAD_BANDS,
            Topology::Hexa => HEXA_BANDS,
            Topology::Octa => OCTA_BANDS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Topology::Quad => "quad",
            Topology::Hexa => "hexa",
            Topology::Octa => "octa",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Topology {
    type Err = GovernorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quad" | "4" => Ok(Topology::Quad),
            "hexa" | "6" => Ok(Topology::Hexa),
            "octa" | "8" => Ok(Topology::Octa),
            other => Err(GovernorError::validation(
                "topology",
                format!("unsupported topology '{}' (expected quad, hexa or octa)", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bands_never_overlap() {
        for topology in Topology::ALL {
            for t in -40..=150 {
                let hits = topology.bands().iter().filter(|b| b.range.contains(t)).count();
                assert!(hits <= 1, "{} matches {} bands at {}", topology, hits, t);
            }
        }
    }

    #[test]
    fn test_band_steps_stay_inside_topology() {
        for topology in Topology::ALL {
            for band in topology.bands() {
                for step in band.steps {
                    if let Up(core) | Down(core) = step {
                        assert!(topology.contains(*core), "{} references cpu{}", topology, core);
                    }
                }
            }
        }
    }

    #[test]
    fn test_quad_never_schedules_core0_down() {
        for band in Topology::Quad.bands() {
            assert!(!band.steps.contains(&Down(CORE0)));
            assert!(!band.steps.contains(&Core0));
        }
    }

    #[test]
    fn test_range_edges() {
        let within = TempRange::Within { above: 55, up_to: 65 };
        assert!(!within.contains(55));
        assert!(within.contains(56));
        assert!(within.contains(65));
        assert!(!within.contains(66));
        assert!(TempRange::Above(80).contains(81));
        assert!(!TempRange::Above(80).contains(80));
        assert!(TempRange::Exactly(55).contains(55));
        assert!(!TempRange::Exactly(55).contains(54));
    }

    #[test]
    fn test_defaults_per_topology() {
        assert!(!Topology::Quad.default_hotplug_enabled());
        assert!(Topology::Hexa.default_hotplug_enabled());
        assert!(Topology::Octa.gates_core0());
        assert_eq!(Topology::from_core_count(6), Some(Topology::Hexa));
        assert_eq!(Topology::from_core_count(2), None);
        assert_eq!("Octa".parse::<Topology>().ok(), Some(Topology::Octa));
        assert!("dual".parse::<Topology>().is_err());
    }
}
