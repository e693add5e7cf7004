use crate::tire::CompoundSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn requires_pit(&self) -> bool {
        *self >= RiskLevel::High
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

fn age_signal(spec: &CompoundSpec, tire_age: u32) -> RiskLevel {
    if tire_age >= spec.critical_age {
        RiskLevel::Critical
    } else if tire_age >= spec.warning_age {
        RiskLevel::High
    } else {
        RiskLevel::Low
    }
}

fn degradation_signal(degradation: f64) -> RiskLevel {
    if degradation >= 0.9 {
        RiskLevel::Critical
    } else if degradation >= 0.7 {
        RiskLevel::High
    } else if degradation >= 0.5 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// The more severe of the age and degradation signals.
pub fn classify(spec: &CompoundSpec, tire_age: u32, degradation: f64) -> RiskLevel {
    age_signal(spec, tire_age).max(degradation_signal(degradation))
}
