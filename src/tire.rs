use crate::error::{PitError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Dry-weather tire compounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Compound {
    Soft,
    Medium,
    Hard,
}

impl Compound {
    pub const ALL: [Compound; 3] = [Compound::Soft, Compound::Medium, Compound::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Compound::Soft => "SOFT",
            Compound::Medium => "MEDIUM",
            Compound::Hard => "HARD",
        }
    }

    /// Ordinal code used as a numeric feature (SOFT=1, MEDIUM=2, HARD=3).
    pub fn code(&self) -> f64 {
        match self {
            Compound::Soft => 1.0,
            Compound::Medium => 2.0,
            Compound::Hard => 3.0,
        }
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compound {
    type Err = PitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "SOFT" => Ok(Compound::Soft),
            "MEDIUM" => Ok(Compound::Medium),
            "HARD" => Ok(Compound::Hard),
            _ => Err(PitError::InvalidCompound {
                compound: s.to_string(),
            }),
        }
    }
}

/// Wear characteristics of one compound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundSpec {
    pub compound: Compound,
    /// Nominal maximum stint length in laps.
    pub max_life: u32,
    pub grip_level: f64,
    pub base_deg_rate: f64,
    pub warning_age: u32,
    pub critical_age: u32,
}

impl CompoundSpec {
    pub fn validate(&self) -> Result<()> {
        if self.max_life == 0 {
            return Err(PitError::validation("max_life", self.max_life, "must be positive"));
        }
        if !(self.grip_level > 0.0 && self.grip_level <= 1.0) {
            return Err(PitError::validation("grip_level", self.grip_level, "must be in (0, 1]"));
        }
        if self.base_deg_rate <= 0.0 {
            return Err(PitError::validation("base_deg_rate", self.base_deg_rate, "must be positive"));
        }
        if self.warning_age >= self.critical_age || self.critical_age > self.max_life {
            return Err(PitError::validation(
                "critical_age",
                self.critical_age,
                format!(
                    "requires warning_age ({}) < critical_age <= max_life ({})",
                    self.warning_age, self.max_life
                ),
            ));
        }
        Ok(())
    }
}

/// One spec per compound, read-only after construction.
#[derive(Debug, Clone)]
pub struct CompoundTable {
    soft: CompoundSpec,
    medium: CompoundSpec,
    hard: CompoundSpec,
}

impl CompoundTable {
    pub fn builtin() -> Self {
        Self {
            soft: CompoundSpec {
                compound: Compound::Soft,
                max_life: 20,
                grip_level: 1.0,
                base_deg_rate: 1.3,
                warning_age: 15,
                critical_age: 19,
            },
            medium: CompoundSpec {
                compound: Compound::Medium,
                max_life: 30,
                grip_level: 0.85,
                base_deg_rate: 1.0,
                warning_age: 22,
                critical_age: 27,
            },
            hard: CompoundSpec {
                compound: Compound::Hard,
                max_life: 40,
                grip_level: 0.7,
                base_deg_rate: 0.8,
                warning_age: 30,
                critical_age: 36,
            },
        }
    }

    /// Builtin table with any supplied specs replacing their compound's entry.
    pub fn with_overrides(overrides: &[CompoundSpec]) -> Result<Self> {
        let mut table = Self::builtin();
        for spec in overrides {
            spec.validate()?;
            match spec.compound {
                Compound::Soft => table.soft = spec.clone(),
                Compound::Medium => table.medium = spec.clone(),
                Compound::Hard => table.hard = spec.clone(),
            }
        }
        Ok(table)
    }

    pub fn get(&self, compound: Compound) -> &CompoundSpec {
        match compound {
            Compound::Soft => &self.soft,
            Compound::Medium => &self.medium,
            Compound::Hard => &self.hard,
        }
    }
}

impl Default for CompoundTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compounds_case_insensitively() {
        assert_eq!("soft".parse::<Compound>().unwrap(), Compound::Soft);
        assert_eq!(" Hard ".parse::<Compound>().unwrap(), Compound::Hard);
    }

    #[test]
    fn unknown_compound_is_rejected() {
        let err = "ULTRASOFT".parse::<Compound>().unwrap_err();
        assert!(matches!(err, PitError::InvalidCompound { ref compound } if compound == "ULTRASOFT"));
    }

    #[test]
    fn builtin_specs_are_valid() {
        let table = CompoundTable::builtin();
        for c in Compound::ALL {
            table.get(c).validate().unwrap();
        }
    }

    #[test]
    fn override_replaces_one_compound() {
        let mut soft = CompoundTable::builtin().get(Compound::Soft).clone();
        soft.max_life = 22;
        soft.critical_age = 21;
        let table = CompoundTable::with_overrides(&[soft]).unwrap();
        assert_eq!(table.get(Compound::Soft).max_life, 22);
        assert_eq!(table.get(Compound::Hard).max_life, 40);
    }

    #[test]
    fn override_with_inverted_ages_fails() {
        let mut hard = CompoundTable::builtin().get(Compound::Hard).clone();
        hard.warning_age = 38;
        assert!(CompoundTable::with_overrides(&[hard]).is_err());
    }
}
