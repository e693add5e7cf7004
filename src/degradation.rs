use crate::config::DegradationConfig;
use crate::error::{PitError, Result};
use crate::fuel::FuelEffectModel;
use crate::tire::CompoundSpec;
use crate::track::TrackProfile;

/// Normalized tire wear in [0, 1].
#[derive(Debug, Clone)]
pub struct DegradationModel {
    fuel: FuelEffectModel,
    evolution_cap: f64,
    normalizer: f64,
}

impl DegradationModel {
    pub fn new(fuel: FuelEffectModel, config: &DegradationConfig) -> Self {
        Self {
            fuel,
            evolution_cap: config.evolution_cap,
            normalizer: config.fuel_normalizer,
        }
    }

    /// Same model with a different fuel normalization constant.
    pub fn with_normalizer(&self, normalizer: f64) -> Self {
        Self {
            normalizer,
            ..self.clone()
        }
    }

    pub fn normalizer(&self) -> f64 {
        self.normalizer
    }

    pub fn fuel(&self) -> &FuelEffectModel {
        &self.fuel
    }

    pub fn reading(
        &self,
        spec: &CompoundSpec,
        tire_age: i32,
        current_lap: u32,
        track: &TrackProfile,
    ) -> Result<f64> {
        let raw = self.unnormalized(spec, tire_age, current_lap, track)?;
        Ok((raw / self.normalizer).clamp(0.0, 1.0))
    }

    /// Wear before dividing by the normalizer; may exceed 1.
    pub(crate) fn unnormalized(
        &self,
        spec: &CompoundSpec,
        tire_age: i32,
        current_lap: u32,
        track: &TrackProfile,
    ) -> Result<f64> {
        if tire_age < 0 {
            return Err(PitError::validation("tire_age", tire_age, "must not be negative"));
        }
        let lap = i32::try_from(current_lap)
            .map_err(|_| PitError::validation("current_lap", current_lap, "out of range"))?;

        let base = f64::from(tire_age) / f64::from(spec.max_life.max(1));
        let evolution_benefit = (track.track_evolution * f64::from(current_lap)).min(self.evolution_cap);
        let fuel = self
            .fuel
            .multiplier(lap, track.total_laps, spec.compound)?
            .min(self.fuel.peak_cap());

        Ok(base * track.tire_deg_factor * (1.0 - evolution_benefit) * fuel)
    }
}

impl Default for DegradationModel {
    fn default() -> Self {
        Self::new(FuelEffectModel::default(), &DegradationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tire::{Compound, CompoundTable};
    use crate::track::TrackStore;

    #[test]
    fn bounded_and_monotone_in_age() {
        let model = DegradationModel::default();
        let compounds = CompoundTable::builtin();
        let tracks = TrackStore::builtin();
        for id in tracks.ids() {
            let track = tracks.get(id).unwrap();
            for c in Compound::ALL {
                let spec = compounds.get(c);
                for lap in [1, 10, 30, track.total_laps] {
                    let mut prev = 0.0;
                    for age in 0..=spec.max_life as i32 {
                        let d = model.reading(spec, age, lap, track).unwrap();
                        assert!((0.0..=1.0).contains(&d));
                        assert!(d >= prev, "{id} {c} lap {lap} age {age}");
                        prev = d;
                    }
                }
            }
        }
    }

    #[test]
    fn fresh_tire_at_race_start_is_undegraded() {
        let model = DegradationModel::default();
        let track = TrackStore::builtin().get("japan").unwrap().clone();
        let spec = CompoundTable::builtin().get(Compound::Medium).clone();
        assert_eq!(track.total_laps, 53);
        assert_eq!(model.reading(&spec, 0, 1, &track).unwrap(), 0.0);
        assert!(model.reading(&spec, 1, 1, &track).unwrap() < 0.05);
    }

    #[test]
    fn small_normalizer_saturates_at_one() {
        let model = DegradationModel::default().with_normalizer(0.1);
        let track = TrackStore::builtin().get("china").unwrap().clone();
        let spec = CompoundTable::builtin().get(Compound::Soft).clone();
        assert_eq!(model.reading(&spec, 20, 1, &track).unwrap(), 1.0);
    }

    #[test]
    fn negative_age_is_rejected() {
        let model = DegradationModel::default();
        let track = TrackStore::builtin().get("spa").unwrap().clone();
        let spec = CompoundTable::builtin().get(Compound::Hard).clone();
        assert!(matches!(
            model.reading(&spec, -1, 5, &track).unwrap_err(),
            PitError::Validation { field: "tire_age", .. }
        ));
    }
}
