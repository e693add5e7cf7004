use crate::data::{LapRecord, SessionRecord};
use crate::degradation::DegradationModel;
use crate::error::Result;
use crate::tire::{Compound, CompoundTable};
use crate::track::TrackProfile;
use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};
use std::collections::HashMap;
use tracing::{debug, info};

pub type FittedLinearRegression = linfa_linear::FittedLinearRegression<f64>;

const MIN_LAPS_PER_COMPOUND: usize = 5;
const NORMALIZER_RANGE: (f64, f64) = (1.0, 4.0);

fn lap_features(tyre_life: f64, track_temp: f64) -> [f64; 3] {
    [tyre_life, track_temp, tyre_life.powi(2)]
}

/// Per-compound lap-time loss as a quadratic in tyre life plus track temperature.
pub struct LapTimeModel {
    models: HashMap<Compound, FittedLinearRegression>,
    mean_track_temp: f64,
}

impl LapTimeModel {
    pub fn new(sessions: &[SessionRecord]) -> Self {
        let data: Vec<&LapRecord> = sessions
            .iter()
            .flat_map(|s| s.driver_laps.values().flatten())
            .filter(|d| d.is_clean())
            .collect();
        let mean_track_temp = if data.is_empty() {
            0.0
        } else {
            data.iter().map(|d| d.track_temp).sum::<f64>() / data.len() as f64
        };

        let models = Compound::ALL
            .iter()
            .filter_map(|&c| Self::build_model(&data, c).map(|m| (c, m)))
            .collect();
        Self {
            models,
            mean_track_temp,
        }
    }

    fn build_model(data: &[&LapRecord], comp: Compound) -> Option<FittedLinearRegression> {
        let comp_data: Vec<_> = data
            .iter()
            .filter(|d| d.compound.parse::<Compound>().ok() == Some(comp))
            .collect();
        if comp_data.len() < MIN_LAPS_PER_COMPOUND {
            return None;
        }

        let feats: Vec<f64> = comp_data
            .iter()
            .flat_map(|d| lap_features(f64::from(d.tyre_life), d.track_temp))
            .collect();
        let targets: Vec<f64> = comp_data.iter().map(|d| d.time_delta).collect();

        let x = Array2::from_shape_vec((comp_data.len(), 3), feats).ok()?;
        let y = Array1::from_vec(targets);
        let ds = Dataset::new(x, y);

        match LinearRegression::new().fit(&ds) {
            Ok(m) => Some(m),
            Err(e) => {
                debug!(compound = %comp, error = %e, "lap-time fit failed");
                None
            }
        }
    }

    pub fn has_model(&self, comp: Compound) -> bool {
        self.models.contains_key(&comp)
    }

    pub fn mean_track_temp(&self) -> f64 {
        self.mean_track_temp
    }

    /// Predicted seconds lost per lap versus the best lap, never negative.
    pub fn predict_time_loss(&self, tyre_lap: u32, temp: f64, comp: Compound) -> Option<f64> {
        let model = self.models.get(&comp)?;
        let feats = Array2::from_shape_vec((1, 3), lap_features(f64::from(tyre_lap), temp).to_vec()).ok()?;
        Some(model.predict(&feats)[0].max(0.0))
    }
}

/// Fitted fuel normalization constant and the per-compound age at which the
/// lap-time loss first reaches the cliff threshold.
#[derive(Debug, Clone)]
pub struct Calibration {
    pub normalizer: f64,
    pub cliff_ages: HashMap<Compound, u32>,
}

/// Chooses the normalizer so a tire at its cliff age, at half race distance,
/// reads as fully degraded. Returns `None` when no compound could be fitted.
pub fn calibrate_normalizer(
    degradation: &DegradationModel,
    lap_model: &LapTimeModel,
    compounds: &CompoundTable,
    track: &TrackProfile,
    cliff_seconds: f64,
) -> Result<Option<Calibration>> {
    let mid_race = (track.total_laps / 2).max(1);
    let temp = lap_model.mean_track_temp();
    let mut candidates = Vec::new();
    let mut cliff_ages = HashMap::new();

    for compound in Compound::ALL {
        if !lap_model.has_model(compound) {
            continue;
        }
        let spec = compounds.get(compound);
        let cliff_age = (1..=spec.max_life)
            .find(|&age| {
                lap_model
                    .predict_time_loss(age, temp, compound)
                    .is_some_and(|loss| loss >= cliff_seconds)
            })
            .unwrap_or(spec.max_life);

        let raw = degradation.unnormalized(spec, cliff_age as i32, mid_race, track)?;
        debug!(compound = %compound, cliff_age, raw, "calibration candidate");
        cliff_ages.insert(compound, cliff_age);
        candidates.push(raw);
    }

    if candidates.is_empty() {
        return Ok(None);
    }
    let normalizer = (candidates.iter().sum::<f64>() / candidates.len() as f64)
        .clamp(NORMALIZER_RANGE.0, NORMALIZER_RANGE.1);
    info!(track = %track.track_id, normalizer, "calibrated degradation normalizer");
    Ok(Some(Calibration {
        normalizer,
        cliff_ages,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::lap;
    use crate::track::TrackStore;

    // loss = 0.05 * age + 0.005 * age^2, independent of temperature
    fn quadratic_session() -> SessionRecord {
        let mut laps = Vec::new();
        for (driver, compound) in [("A", "SOFT"), ("B", "MEDIUM"), ("C", "HARD")] {
            for age in 0..20u32 {
                let a = f64::from(age);
                let mut l = lap(driver, age + 1, compound, age, 90.0 + 0.05 * a + 0.005 * a * a);
                l.track_temp = 25.0 + f64::from((age * 7) % 11);
                laps.push(l);
            }
        }
        SessionRecord::from_laps("monza", 2023, laps)
    }

    #[test]
    fn fits_lap_time_loss_per_compound() {
        let model = LapTimeModel::new(&[quadratic_session()]);
        for c in Compound::ALL {
            assert!(model.has_model(c));
            let loss = model.predict_time_loss(10, 30.0, c).unwrap();
            assert!((loss - 1.0).abs() < 1e-6, "{c}: {loss}");
        }
    }

    #[test]
    fn too_few_laps_leaves_compound_unfitted() {
        let session = SessionRecord::from_laps("monza", 2023, vec![lap("A", 1, "SOFT", 0, 90.0)]);
        let model = LapTimeModel::new(&[session]);
        assert!(!model.has_model(Compound::Soft));
        assert_eq!(model.predict_time_loss(5, 30.0, Compound::Soft), None);
    }

    #[test]
    fn calibration_finds_cliff_and_bounded_normalizer() {
        let track = TrackStore::builtin().get("monza").unwrap().clone();
        let model = LapTimeModel::new(&[quadratic_session()]);
        let cal = calibrate_normalizer(&DegradationModel::default(), &model, &CompoundTable::builtin(), &track, 1.5)
            .unwrap()
            .unwrap();
        // 0.05a + 0.005a^2 >= 1.5 first holds at a = 14
        assert_eq!(cal.cliff_ages[&Compound::Soft], 14);
        assert!((NORMALIZER_RANGE.0..=NORMALIZER_RANGE.1).contains(&cal.normalizer));
    }

    #[test]
    fn no_fitted_compounds_means_no_calibration() {
        let track = TrackStore::builtin().get("monza").unwrap().clone();
        let model = LapTimeModel::new(&[]);
        let cal = calibrate_normalizer(&DegradationModel::default(), &model, &CompoundTable::builtin(), &track, 1.5)
            .unwrap();
        assert!(cal.is_none());
    }
}
