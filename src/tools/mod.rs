//! Analytics tool facades
//!
//! Deterministic, side-effect-free computations over relational project
//! data. Tools never mutate state and never call the LLM; every result
//! type serializes cleanly so agents can embed it in reports and
//! prompts. Determinism is relative to the database snapshot and the
//! tool's reference date.

pub mod cost;
pub mod progress;
pub mod safety;

use serde::{Deserialize, Serialize};

pub use cost::CostTools;
pub use progress::ProgressTools;
pub use safety::SafetyTools;

/// Traffic-light risk level shared across the tool facades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficLight {
    Green,
    Yellow,
    Red,
    Unknown,
}

impl Default for TrafficLight {
    fn default() -> Self {
        TrafficLight::Unknown
    }
}

impl TrafficLight {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficLight::Green => "green",
            TrafficLight::Yellow => "yellow",
            TrafficLight::Red => "red",
            TrafficLight::Unknown => "unknown",
        }
    }

    /// Ordering for "worst wins" comparisons: red < yellow < green
    pub fn severity_rank(&self) -> u8 {
        match self {
            TrafficLight::Red => 0,
            TrafficLight::Yellow => 1,
            TrafficLight::Green => 2,
            TrafficLight::Unknown => 3,
        }
    }
}
