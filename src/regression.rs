use crate::config::RegressionParams;
use crate::data::TrainingSample;
use crate::error::{PitError, Result};
use crate::features::{FeatureVector, FEATURE_NAMES, NUM_FEATURES, SCHEMA_VERSION};
use crate::gbdt::{self, Forest};
use crate::heuristic::{model_half_width, PitWindow};
use crate::state::{RaceState, TireState};
use crate::tire::CompoundSpec;
use crate::track::{normalize_track_id, TrackProfile};
use ndarray::{Array2, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Lowest confidence a model prediction can report.
pub const ML_CONFIDENCE_FLOOR: f64 = 0.585;
const ML_CONFIDENCE_BASE: f64 = 0.65;
const ML_CONFIDENCE_CEILING: f64 = 0.85;

pub const MIN_TRAINING_SAMPLES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub train_samples: usize,
    pub valid_samples: usize,
    pub trees: usize,
}

/// Persisted artifact: one per track, replaced wholesale on retrain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub track_id: String,
    pub schema_version: u32,
    pub feature_names: Vec<String>,
    pub forest: Forest,
    /// Calibrated fuel normalizer, when calibration ran at train time.
    #[serde(default)]
    pub degradation_normalizer: Option<f64>,
    pub metrics: TrainingMetrics,
}

impl TrainedModel {
    pub fn check_schema(&self) -> Result<()> {
        let names_match = self.feature_names.len() == NUM_FEATURES
            && self.feature_names.iter().zip(FEATURE_NAMES).all(|(a, b)| a == b);
        if self.schema_version != SCHEMA_VERSION || !names_match || self.forest.num_features != NUM_FEATURES {
            return Err(PitError::SchemaMismatch {
                expected: format!("v{SCHEMA_VERSION} ({NUM_FEATURES} features)"),
                found: format!("v{} ({} features)", self.schema_version, self.feature_names.len()),
            });
        }
        if let Some(n) = self.degradation_normalizer {
            if !(n.is_finite() && n > 0.0) {
                return Err(PitError::validation("degradation_normalizer", n, "must be positive"));
            }
        }
        Ok(())
    }

    /// Predicted laps remaining in the current stint.
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        self.forest.predict(features.as_slice())
    }

    /// Split counts per feature, most used first.
    pub fn feature_importance(&self) -> Vec<(String, usize)> {
        let mut importance: Vec<(String, usize)> = self
            .feature_names
            .iter()
            .cloned()
            .zip(self.forest.split_counts())
            .collect();
        importance.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        importance
    }

    /// Grows with the share of features the ensemble uses, shrinks when the
    /// tire is very early or very late in its nominal life.
    pub fn confidence(&self, stint_progress: f64) -> f64 {
        let counts = self.forest.split_counts();
        let used = counts.iter().filter(|&&c| c > 0).count();
        let mut confidence = (ML_CONFIDENCE_BASE + used as f64 / counts.len().max(1) as f64 * 0.2)
            .min(ML_CONFIDENCE_CEILING);
        if stint_progress > 0.8 {
            confidence *= 0.9;
        } else if stint_progress < 0.2 {
            confidence *= 0.95;
        }
        confidence.max(ML_CONFIDENCE_FLOOR)
    }
}

/// Directory of trained models, `pit_model_<track_id>.json`.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, track: &str) -> PathBuf {
        self.dir.join(format!("pit_model_{}.json", normalize_track_id(track)))
    }

    /// Writes to a temporary file and renames it over the old artifact so
    /// readers never observe a partial model.
    pub fn save(&self, model: &TrainedModel) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&model.track_id);
        let tmp = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, model)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        info!(track = %model.track_id, path = %path.display(), "saved model");
        Ok(path)
    }

    /// `Ok(None)` when the track has never been trained.
    pub fn load(&self, track: &str) -> Result<Option<TrainedModel>> {
        let path = self.path_for(track);
        if !path.exists() {
            return Ok(None);
        }
        Self::load_file(&path).map(Some)
    }

    pub fn load_file(path: &Path) -> Result<TrainedModel> {
        let model: TrainedModel = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        model.check_schema()?;
        debug!(track = %model.track_id, trees = model.forest.trees.len(), "loaded model");
        Ok(model)
    }
}

/// Model output mapped onto the race.
#[derive(Debug, Clone)]
pub struct ModelEstimate {
    pub laps_until_pit: f64,
    pub window: PitWindow,
    pub confidence: f64,
    pub uncertainty: f64,
}

pub struct RegressionEngine {
    params: RegressionParams,
}

fn to_matrix(samples: &[TrainingSample]) -> Result<Array2<f64>> {
    let flat: Vec<f64> = samples
        .iter()
        .flat_map(|s| s.features.as_slice().iter().copied())
        .collect();
    Array2::from_shape_vec((samples.len(), NUM_FEATURES), flat)
        .map_err(|e| PitError::Regression(e.to_string()))
}

impl RegressionEngine {
    pub fn new(params: RegressionParams) -> Self {
        Self { params }
    }

    /// Shuffles, holds out `validation_fraction` of the samples, fits the
    /// ensemble and reports MAE/RMSE on the held-out part.
    pub fn train(&self, track: &TrackProfile, samples: &[TrainingSample]) -> Result<TrainedModel> {
        self.params.validate()?;
        if samples.len() < MIN_TRAINING_SAMPLES {
            return Err(PitError::InsufficientData {
                track: track.track_id.clone(),
                reason: format!(
                    "{} training samples, need at least {MIN_TRAINING_SAMPLES}",
                    samples.len()
                ),
            });
        }

        let x = to_matrix(samples)?;
        let y: Vec<f64> = samples.iter().map(|s| s.label).collect();

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.shuffle(&mut rng);
        let n_valid = (samples.len() as f64 * self.params.validation_fraction).round() as usize;
        let (valid_idx, train_idx) = order.split_at(n_valid);

        let x_train = x.select(Axis(0), train_idx);
        let y_train: Vec<f64> = train_idx.iter().map(|&i| y[i]).collect();
        let x_valid = x.select(Axis(0), valid_idx);
        let y_valid: Vec<f64> = valid_idx.iter().map(|&i| y[i]).collect();

        let (forest, report) = gbdt::fit(&x_train, &y_train, &x_valid, &y_valid, &self.params)?;

        let (eval_x, eval_y) = if y_valid.is_empty() {
            (&x_train, &y_train)
        } else {
            (&x_valid, &y_valid)
        };
        let preds = forest.predict_all(eval_x);
        let n = eval_y.len() as f64;
        let mae = preds.iter().zip(eval_y.iter()).map(|(p, t)| (p - t).abs()).sum::<f64>() / n;
        let rmse = (preds.iter().zip(eval_y.iter()).map(|(p, t)| (p - t).powi(2)).sum::<f64>() / n).sqrt();

        info!(
            track = %track.track_id,
            train = y_train.len(),
            valid = y_valid.len(),
            trees = report.best_rounds,
            rounds = report.rounds_run,
            mae,
            rmse,
            "trained pit model"
        );

        Ok(TrainedModel {
            track_id: normalize_track_id(&track.track_id),
            schema_version: SCHEMA_VERSION,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            metrics: TrainingMetrics {
                mae,
                rmse,
                train_samples: y_train.len(),
                valid_samples: y_valid.len(),
                trees: forest.trees.len(),
            },
            forest,
            degradation_normalizer: None,
        })
    }

    /// Predicts remaining stint laps and derives the window around the
    /// resulting pit lap.
    pub fn predict(
        &self,
        model: &TrainedModel,
        features: &FeatureVector,
        race: &RaceState,
        tire: &TireState,
        spec: &CompoundSpec,
        track: &TrackProfile,
    ) -> ModelEstimate {
        let raw = model.predict(features).max(0.0);
        let optimal = i64::from(race.current_lap) + raw.round() as i64;

        let half = model_half_width(track, tire.compound);
        let window = PitWindow::around(race, optimal, half, half);
        // once clipped to the race, report the distance to the lap actually recommended
        let laps_until_pit = if i64::from(window.optimal_lap) == optimal {
            raw
        } else {
            f64::from(window.optimal_lap - race.current_lap)
        };

        let stint_progress = f64::from(tire.age) / f64::from(spec.max_life.max(1));
        ModelEstimate {
            laps_until_pit,
            window,
            confidence: model.confidence(stint_progress),
            uncertainty: window.half_width(),
        }
    }
}

impl Default for RegressionEngine {
    fn default() -> Self {
        Self::new(RegressionParams::default())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features;
    use crate::state::NO_GAP;
    use crate::tire::{Compound, CompoundTable};
    use crate::track::TrackStore;
    use rand::Rng;

    pub(crate) fn synthetic_samples(track: &TrackProfile, n: usize, seed: u64) -> Vec<TrainingSample> {
        let compounds = CompoundTable::builtin();
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let compound = Compound::ALL[rng.gen_range(0..3)];
                let spec = compounds.get(compound);
                let age = rng.gen_range(0..spec.max_life);
                let lap = rng.gen_range(1..track.total_laps);
                let race = RaceState {
                    current_lap: lap,
                    total_laps: track.total_laps,
                    position: rng.gen_range(1..=20),
                    gap_ahead: rng.gen_range(0.5..4.0),
                    gap_behind: NO_GAP,
                    lap_progress: 0.0,
                };
                let tire = TireState {
                    compound,
                    age,
                    last_lap_time_seconds: rng.gen_range(80.0..95.0),
                    track_temp_c: 35.0,
                    air_temp_c: 24.0,
                    humidity: 45.0,
                };
                TrainingSample {
                    features: features::build(&race, &tire, track, spec),
                    label: f64::from(spec.max_life - age),
                }
            })
            .collect()
    }

    fn params() -> RegressionParams {
        RegressionParams {
            num_trees: 300,
            learning_rate: 0.1,
            min_samples_leaf: 5,
            ..RegressionParams::default()
        }
    }

    fn monza() -> TrackProfile {
        TrackStore::builtin().get("monza").unwrap().clone()
    }

    #[test]
    fn training_converges_on_training_samples() {
        let track = monza();
        let samples = synthetic_samples(&track, 600, 1);
        let model = RegressionEngine::new(params()).train(&track, &samples).unwrap();
        assert!(model.metrics.valid_samples > 0);
        assert!(model.metrics.mae < 2.0, "mae {}", model.metrics.mae);
        for s in samples.iter().take(25) {
            let pred = model.predict(&s.features);
            assert!((pred - s.label).abs() < 3.0, "pred {pred} label {}", s.label);
        }
    }

    #[test]
    fn too_few_samples_is_insufficient_data() {
        let track = monza();
        let samples = synthetic_samples(&track, 5, 1);
        let err = RegressionEngine::default().train(&track, &samples).unwrap_err();
        assert!(matches!(err, PitError::InsufficientData { .. }));
    }

    #[test]
    fn confidence_is_bounded_and_penalizes_stint_extremes() {
        let track = monza();
        let model = RegressionEngine::new(params())
            .train(&track, &synthetic_samples(&track, 300, 2))
            .unwrap();
        let mid = model.confidence(0.5);
        assert!(mid <= ML_CONFIDENCE_CEILING && mid >= ML_CONFIDENCE_FLOOR);
        assert!(model.confidence(0.9) < mid);
        assert!(model.confidence(0.1) < mid);
        assert!(model.confidence(0.9) >= ML_CONFIDENCE_FLOOR);
    }

    #[test]
    fn importance_is_sorted_and_named() {
        let track = monza();
        let model = RegressionEngine::new(params())
            .train(&track, &synthetic_samples(&track, 300, 3))
            .unwrap();
        let importance = model.feature_importance();
        assert_eq!(importance.len(), NUM_FEATURES);
        assert!(importance.windows(2).all(|w| w[0].1 >= w[1].1));
        assert!(importance[0].1 > 0);
    }

    #[test]
    fn store_round_trip_and_overwrite() {
        let dir = std::env::temp_dir().join(format!("pitwindow-store-{}", std::process::id()));
        let store = ModelStore::new(&dir);
        let track = monza();
        assert!(store.load("Monza").unwrap().is_none());

        let engine = RegressionEngine::new(params());
        let first = engine.train(&track, &synthetic_samples(&track, 200, 4)).unwrap();
        store.save(&first).unwrap();
        let mut second = engine.train(&track, &synthetic_samples(&track, 200, 5)).unwrap();
        second.degradation_normalizer = Some(1.7);
        let path = store.save(&second).unwrap();

        assert_eq!(path, store.path_for("monza"));
        assert!(!path.with_extension("json.tmp").exists());
        let loaded = store.load("MONZA").unwrap().unwrap();
        assert_eq!(loaded.degradation_normalizer, Some(1.7));
        assert_eq!(loaded.forest.trees.len(), second.forest.trees.len());
        let sample = &synthetic_samples(&track, 1, 9)[0].features;
        assert!((loaded.predict(sample) - second.predict(sample)).abs() < 1e-9);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn stale_schema_is_rejected() {
        let track = monza();
        let mut model = RegressionEngine::new(params())
            .train(&track, &synthetic_samples(&track, 100, 6))
            .unwrap();
        model.schema_version += 1;
        assert!(matches!(model.check_schema().unwrap_err(), PitError::SchemaMismatch { .. }));
    }

    fn constant_model(track: &TrackProfile, laps: f64) -> TrainedModel {
        TrainedModel {
            track_id: track.track_id.clone(),
            schema_version: SCHEMA_VERSION,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            forest: Forest {
                base_score: laps,
                num_features: NUM_FEATURES,
                trees: Vec::new(),
            },
            degradation_normalizer: None,
            metrics: TrainingMetrics {
                mae: 0.0,
                rmse: 0.0,
                train_samples: 0,
                valid_samples: 0,
                trees: 0,
            },
        }
    }

    #[test]
    fn overshooting_prediction_reports_clipped_distance() {
        let track = monza();
        let spec = CompoundTable::builtin().get(Compound::Hard).clone();
        let race = RaceState {
            current_lap: 45,
            total_laps: track.total_laps,
            position: 3,
            gap_ahead: 1.0,
            gap_behind: 1.0,
            lap_progress: 0.0,
        };
        let tire = TireState {
            compound: Compound::Hard,
            age: 10,
            last_lap_time_seconds: 84.0,
            track_temp_c: 35.0,
            air_temp_c: 24.0,
            humidity: 45.0,
        };
        let fv = features::build(&race, &tire, &track, &spec);
        let engine = RegressionEngine::default();

        let far = engine.predict(&constant_model(&track, 100.0), &fv, &race, &tire, &spec, &track);
        assert_eq!(far.window.optimal_lap, 52);
        assert_eq!(far.laps_until_pit, 7.0);

        let near = engine.predict(&constant_model(&track, 3.2), &fv, &race, &tire, &spec, &track);
        assert_eq!(near.window.optimal_lap, 48);
        assert_eq!(near.laps_until_pit, 3.2);
    }

    #[test]
    fn estimate_window_is_well_formed() {
        let track = monza();
        let compounds = CompoundTable::builtin();
        let samples = synthetic_samples(&track, 300, 7);
        let engine = RegressionEngine::new(params());
        let model = engine.train(&track, &samples).unwrap();

        for lap in [1, 20, 45, 52] {
            let race = RaceState {
                current_lap: lap,
                total_laps: track.total_laps,
                position: 3,
                gap_ahead: 1.0,
                gap_behind: 1.0,
                lap_progress: 0.0,
            };
            let tire = TireState {
                compound: Compound::Hard,
                age: 10,
                last_lap_time_seconds: 85.0,
                track_temp_c: 35.0,
                air_temp_c: 24.0,
                humidity: 45.0,
            };
            let spec = compounds.get(Compound::Hard);
            let fv = features::build(&race, &tire, &track, spec);
            let est = engine.predict(&model, &fv, &race, &tire, spec, &track);
            let w = est.window;
            assert!(w.start_lap > lap && w.start_lap <= w.optimal_lap && w.optimal_lap <= w.end_lap);
            assert!(w.end_lap <= track.total_laps);
            assert_eq!(est.uncertainty, w.half_width());
        }
    }
}
