use crate::error::{PitError, Result};
use crate::tire::{Compound, CompoundSpec};
use crate::track::TrackProfile;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

/// What to do when a prediction is requested for a track with no trained model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingModelPolicy {
    Fail,
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelVariant {
    Exponential,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowVariant {
    Canonical,
    DegradationScaled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionParams {
    pub num_trees: usize,
    pub learning_rate: f64,
    pub num_leaves: usize,
    pub min_samples_leaf: usize,
    pub feature_fraction: f64,
    pub early_stopping_rounds: usize,
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for RegressionParams {
    fn default() -> Self {
        Self {
            num_trees: 100,
            learning_rate: 0.05,
            num_leaves: 31,
            min_samples_leaf: 20,
            feature_fraction: 0.9,
            early_stopping_rounds: 10,
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompoundSensitivity {
    pub soft: f64,
    pub medium: f64,
    pub hard: f64,
}

impl CompoundSensitivity {
    pub fn for_compound(&self, compound: Compound) -> f64 {
        match compound {
            Compound::Soft => self.soft,
            Compound::Medium => self.medium,
            Compound::Hard => self.hard,
        }
    }
}

impl Default for CompoundSensitivity {
    fn default() -> Self {
        Self {
            soft: 1.0,
            medium: 0.75,
            hard: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuelConfig {
    pub variant: FuelVariant,
    /// Multiplier at lap 0 for a compound with sensitivity 1.
    pub peak: f64,
    pub peak_cap: f64,
    /// Exponential decay over a full race distance; the per-lap constant is this divided by total laps.
    pub decay_per_race: f64,
    pub sensitivity: CompoundSensitivity,
}

impl Default for FuelConfig {
    fn default() -> Self {
        Self {
            variant: FuelVariant::Exponential,
            peak: 2.0,
            peak_cap: 2.0,
            decay_per_race: 5.0,
            sensitivity: CompoundSensitivity::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    pub evolution_cap: f64,
    /// Divisor folding the fuel multiplier into the [0, 1] degradation range.
    pub fuel_normalizer: f64,
    /// Replace `fuel_normalizer` with a value fitted on historical lap times at train time.
    pub calibrate: bool,
    /// Lap-time loss (s) treated as fully degraded when calibrating.
    pub cliff_seconds: f64,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            evolution_cap: 0.5,
            fuel_normalizer: 2.0,
            calibrate: true,
            cliff_seconds: 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub model_dir: PathBuf,
    pub missing_model: MissingModelPolicy,
    pub regression: RegressionParams,
    pub fuel: FuelConfig,
    pub degradation: DegradationConfig,
    pub window_variant: WindowVariant,
    pub tracks: Vec<TrackProfile>,
    pub compounds: Vec<CompoundSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            missing_model: MissingModelPolicy::Heuristic,
            regression: RegressionParams::default(),
            fuel: FuelConfig::default(),
            degradation: DegradationConfig::default(),
            window_variant: WindowVariant::Canonical,
            tracks: Vec::new(),
            compounds: Vec::new(),
        }
    }
}

fn ensure(ok: bool, field: &'static str, value: impl ToString, reason: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(PitError::validation(field, value, reason))
    }
}

impl RegressionParams {
    pub fn validate(&self) -> Result<()> {
        ensure(self.num_trees >= 1, "num_trees", self.num_trees, "must be >= 1")?;
        ensure(
            self.learning_rate > 0.0 && self.learning_rate <= 1.0,
            "learning_rate",
            self.learning_rate,
            "must be in (0, 1]",
        )?;
        ensure(self.num_leaves >= 2, "num_leaves", self.num_leaves, "must be >= 2")?;
        ensure(self.min_samples_leaf >= 1, "min_samples_leaf", self.min_samples_leaf, "must be >= 1")?;
        ensure(
            self.feature_fraction > 0.0 && self.feature_fraction <= 1.0,
            "feature_fraction",
            self.feature_fraction,
            "must be in (0, 1]",
        )?;
        ensure(
            (0.0..0.5).contains(&self.validation_fraction),
            "validation_fraction",
            self.validation_fraction,
            "must be in [0, 0.5)",
        )
    }
}

impl FuelConfig {
    pub fn validate(&self) -> Result<()> {
        ensure(self.peak.is_finite() && self.peak >= 1.0, "fuel.peak", self.peak, "must be >= 1")?;
        ensure(
            self.peak_cap.is_finite() && self.peak_cap >= 1.0,
            "fuel.peak_cap",
            self.peak_cap,
            "must be >= 1",
        )?;
        ensure(
            self.decay_per_race.is_finite() && self.decay_per_race >= 0.0,
            "fuel.decay_per_race",
            self.decay_per_race,
            "must be >= 0",
        )?;
        for c in Compound::ALL {
            let s = self.sensitivity.for_compound(c);
            ensure((0.0..=1.0).contains(&s), "fuel.sensitivity", s, "must be in [0, 1]")?;
        }
        Ok(())
    }
}

impl DegradationConfig {
    pub fn validate(&self) -> Result<()> {
        ensure(
            (0.0..=1.0).contains(&self.evolution_cap),
            "degradation.evolution_cap",
            self.evolution_cap,
            "must be in [0, 1]",
        )?;
        ensure(
            self.fuel_normalizer.is_finite() && self.fuel_normalizer > 0.0,
            "degradation.fuel_normalizer",
            self.fuel_normalizer,
            "must be positive",
        )?;
        ensure(
            self.cliff_seconds.is_finite() && self.cliff_seconds > 0.0,
            "degradation.cliff_seconds",
            self.cliff_seconds,
            "must be positive",
        )
    }
}

impl EngineConfig {
    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Range checks for every numeric section. Track and compound overrides
    /// are checked when the tables are built.
    pub fn validate(&self) -> Result<()> {
        self.regression.validate()?;
        self.fuel.validate()?;
        self.degradation.validate()
    }
}
