use crate::calibration::{calibrate_normalizer, LapTimeModel};
use crate::composer::{compose, PredictionResult, TireAssessment, WindowEstimate};
use crate::config::{EngineConfig, MissingModelPolicy};
use crate::data::{derive_characteristics, training_samples, HistoricalDataSource, SessionRecord, TrackCharacteristics};
use crate::degradation::DegradationModel;
use crate::error::{PitError, Result};
use crate::features;
use crate::fuel::FuelEffectModel;
use crate::heuristic::HeuristicCalculator;
use crate::regression::{ModelStore, RegressionEngine, TrainedModel};
use crate::risk;
use crate::state::PredictionInput;
use crate::tire::CompoundTable;
use crate::track::{TrackProfile, TrackStore};
use tracing::{debug, info, warn};

/// Entry point tying the numeric models, the regression engine and the
/// model store together.
pub struct PitWindowEngine {
    tracks: TrackStore,
    compounds: CompoundTable,
    degradation: DegradationModel,
    heuristic: HeuristicCalculator,
    regression: RegressionEngine,
    store: ModelStore,
    missing_model: MissingModelPolicy,
    calibrate: bool,
    cliff_seconds: f64,
}

impl PitWindowEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let tracks = TrackStore::with_overrides(&config.tracks)?;
        let compounds = CompoundTable::with_overrides(&config.compounds)?;
        let fuel = FuelEffectModel::new(config.fuel.clone());
        let degradation = DegradationModel::new(fuel, &config.degradation);
        debug!(
            tracks = tracks.ids().len(),
            model_dir = %config.model_dir.display(),
            policy = ?config.missing_model,
            "engine ready"
        );
        Ok(Self {
            tracks,
            compounds,
            degradation,
            heuristic: HeuristicCalculator::new(config.window_variant),
            regression: RegressionEngine::new(config.regression.clone()),
            store: ModelStore::new(config.model_dir.clone()),
            missing_model: config.missing_model,
            calibrate: config.degradation.calibrate,
            cliff_seconds: config.degradation.cliff_seconds,
        })
    }

    pub fn tracks(&self) -> &TrackStore {
        &self.tracks
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    fn fetch(
        &self,
        profile: &TrackProfile,
        years: &[u16],
        source: &dyn HistoricalDataSource,
    ) -> Result<Vec<SessionRecord>> {
        let sessions = source.fetch_races(&profile.track_id, years).map_err(|e| {
            warn!(track = %profile.track_id, error = %e, "historical data source failed");
            PitError::InsufficientData {
                track: profile.track_id.clone(),
                reason: format!("data source failed: {e}"),
            }
        })?;
        if sessions.is_empty() {
            return Err(PitError::InsufficientData {
                track: profile.track_id.clone(),
                reason: format!("no sessions for years {years:?}"),
            });
        }
        Ok(sessions)
    }

    /// Trains and persists the model for `track`, replacing any previous one.
    pub fn train(
        &self,
        track: &str,
        years: &[u16],
        source: &dyn HistoricalDataSource,
    ) -> Result<TrainedModel> {
        let profile = self.tracks.get(track)?;
        let sessions = self.fetch(profile, years, source)?;

        let samples = training_samples(&sessions, profile, &self.compounds);
        info!(track = %profile.track_id, sessions = sessions.len(), samples = samples.len(), "extracted training samples");
        let mut model = self.regression.train(profile, &samples)?;

        if self.calibrate {
            let lap_model = LapTimeModel::new(&sessions);
            let calibration =
                calibrate_normalizer(&self.degradation, &lap_model, &self.compounds, profile, self.cliff_seconds)?;
            if let Some(c) = &calibration {
                debug!(track = %profile.track_id, cliff_ages = ?c.cliff_ages, "compound cliff ages");
            }
            model.degradation_normalizer = calibration.map(|c| c.normalizer);
        }

        self.store.save(&model)?;
        Ok(model)
    }

    pub fn predict(&self, track: &str, input: &PredictionInput) -> Result<PredictionResult> {
        let profile = self.tracks.get(track)?;
        let (race, tire) = input.into_states(profile, &self.compounds)?;
        race.ensure_laps_remaining()?;
        let spec = self.compounds.get(tire.compound);

        let model = self.store.load(&profile.track_id)?;
        if model.is_none() && self.missing_model == MissingModelPolicy::Fail {
            return Err(PitError::UntrainedModel {
                track: profile.track_id.clone(),
            });
        }

        let degradation = match model.as_ref().and_then(|m| m.degradation_normalizer) {
            Some(n) => self.degradation.with_normalizer(n),
            None => self.degradation.clone(),
        };
        // age <= max_life after validation
        let age = tire.age as i32;
        let reading = degradation.reading(spec, age, race.current_lap, profile)?;
        let fuel_effect = degradation
            .fuel()
            .multiplier(race.current_lap as i32, race.total_laps, tire.compound)?;
        let assessment = TireAssessment {
            degradation: reading,
            fuel_effect,
            risk: risk::classify(spec, tire.age, reading),
        };

        let estimate = match &model {
            Some(m) => {
                let fv = features::build(&race, &tire, profile, spec);
                WindowEstimate::Model(self.regression.predict(m, &fv, &race, &tire, spec, profile))
            }
            None => {
                warn!(track = %profile.track_id, "no trained model, using heuristic pit window");
                WindowEstimate::Heuristic(self.heuristic.window(&race, tire.age, spec, reading, profile))
            }
        };

        let result = compose(&race, &tire, spec, profile, assessment, estimate);
        debug!(
            track = %profile.track_id,
            optimal = result.optimal_pit_lap,
            risk = %result.risk,
            source = ?result.source,
            "prediction"
        );
        Ok(result)
    }

    pub fn characteristics(
        &self,
        track: &str,
        years: &[u16],
        source: &dyn HistoricalDataSource,
    ) -> Result<TrackCharacteristics> {
        let profile = self.tracks.get(track)?;
        let sessions = self.fetch(profile, years, source)?;
        derive_characteristics(profile, &sessions)
    }

    /// Split-count importance of the persisted model, most used first.
    pub fn feature_importance(&self, track: &str) -> Result<Vec<(String, usize)>> {
        let profile = self.tracks.get(track)?;
        let model = self
            .store
            .load(&profile.track_id)?
            .ok_or_else(|| PitError::UntrainedModel {
                track: profile.track_id.clone(),
            })?;
        Ok(model.feature_importance())
    }
}
