use crate::config::{FuelConfig, FuelVariant};
use crate::error::{PitError, Result};
use crate::tire::Compound;

/// Extra tire stress from the fuel still on board.
///
/// The multiplier peaks at lap 0 with a full tank and decays toward 1.0 as
/// fuel burns off. Softer compounds carry a larger peak.
#[derive(Debug, Clone)]
pub struct FuelEffectModel {
    config: FuelConfig,
}

impl FuelEffectModel {
    pub fn new(config: FuelConfig) -> Self {
        Self { config }
    }

    pub fn peak_cap(&self) -> f64 {
        self.config.peak_cap
    }

    pub fn multiplier(&self, lap: i32, total_laps: u32, compound: Compound) -> Result<f64> {
        if lap < 0 {
            return Err(PitError::validation("lap_number", lap, "must not be negative"));
        }
        if total_laps == 0 {
            return Err(PitError::validation("total_laps", total_laps, "must be positive"));
        }
        let cfg = &self.config;
        let amplitude = (cfg.peak - 1.0) * cfg.sensitivity.for_compound(compound);
        let lap = f64::from(lap);
        let total = f64::from(total_laps);

        let remaining_share = match cfg.variant {
            FuelVariant::Exponential => (-(cfg.decay_per_race / total) * lap).exp(),
            FuelVariant::Linear => (1.0 - lap / total).max(0.0),
        };
        let effect = 1.0 + amplitude * remaining_share;
        Ok(effect.clamp(1.0, cfg.peak_cap.max(1.0)))
    }
}

impl Default for FuelEffectModel {
    fn default() -> Self {
        Self::new(FuelConfig::default())
    }
}
