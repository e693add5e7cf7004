//! Fixed-schema feature vector shared by training and inference.
//!
//! The column order below *is* the schema. Any change to names or order must
//! bump [`SCHEMA_VERSION`] so stale models are rejected on load.

use crate::state::{RaceState, TireState};
use crate::tire::CompoundSpec;
use crate::track::{TrackProfile, TrackType};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: u32 = 2;

pub const FEATURE_NAMES: [&str; 30] = [
    // raw race state
    "position",
    "gap_ahead",
    "gap_behind",
    "lap_number",
    "remaining_laps",
    // raw tire state
    "tire_age",
    "compound_code",
    "last_lap_time",
    "track_temp",
    "air_temp",
    "humidity",
    // track
    "overtaking_difficulty",
    "safety_car_probability",
    "track_evolution",
    "tire_deg_factor",
    // compound-derived
    "grip_level",
    "base_deg_rate",
    "tire_life_fraction",
    "nominal_laps_left",
    // race progress
    "race_progress",
    "evolution_factor",
    // track type one-hot
    "track_high_speed",
    "track_technical",
    "track_street",
    // interactions
    "deg_factor_x_evolution",
    "overtaking_x_safety_car",
    "compound_deg_x_track_deg",
    "tire_age_x_lap",
    "life_fraction_x_compound",
    "position_x_lap_time",
];

pub const NUM_FEATURES: usize = FEATURE_NAMES.len();

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.values[i])
    }
}

fn flag(on: bool) -> f64 {
    if on {
        1.0
    } else {
        0.0
    }
}

/// Builds the feature vector for one car on one lap.
pub fn build(
    race: &RaceState,
    tire: &TireState,
    track: &TrackProfile,
    spec: &CompoundSpec,
) -> FeatureVector {
    let lap = f64::from(race.current_lap);
    let total = f64::from(track.total_laps.max(1));
    let age = f64::from(tire.age);
    let max_life = f64::from(spec.max_life.max(1));
    let life_fraction = age / max_life;

    let values = vec![
        f64::from(race.position),
        race.gap_ahead,
        race.gap_behind,
        lap,
        f64::from(track.total_laps.saturating_sub(race.current_lap)),
        age,
        spec.compound.code(),
        tire.last_lap_time_seconds,
        tire.track_temp_c,
        tire.air_temp_c,
        tire.humidity,
        track.overtaking_difficulty,
        track.safety_car_probability,
        track.track_evolution,
        track.tire_deg_factor,
        spec.grip_level,
        spec.base_deg_rate,
        life_fraction,
        (max_life - age).max(0.0),
        lap / total,
        1.0 + track.track_evolution * lap / 10.0,
        flag(track.track_type == TrackType::HighSpeed),
        flag(track.track_type == TrackType::Technical),
        flag(track.track_type == TrackType::Street),
        track.tire_deg_factor * track.track_evolution,
        track.overtaking_difficulty * track.safety_car_probability,
        spec.base_deg_rate * track.tire_deg_factor,
        age * lap,
        life_fraction * spec.compound.code(),
        f64::from(race.position) * tire.last_lap_time_seconds,
    ];
    debug_assert_eq!(values.len(), NUM_FEATURES);
    FeatureVector { values }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::NO_GAP;
    use crate::tire::{Compound, CompoundTable};
    use crate::track::TrackStore;

    fn states() -> (RaceState, TireState) {
        (
            RaceState {
                current_lap: 20,
                total_laps: 53,
                position: 4,
                gap_ahead: 2.5,
                gap_behind: NO_GAP,
                lap_progress: 0.5,
            },
            TireState {
                compound: Compound::Soft,
                age: 10,
                last_lap_time_seconds: 84.0,
                track_temp_c: 41.0,
                air_temp_c: 28.0,
                humidity: 40.0,
            },
        )
    }

    #[test]
    fn schema_length_and_names_are_unique() {
        let mut names = FEATURE_NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), NUM_FEATURES);
    }

    #[test]
    fn builds_expected_values() {
        let (race, tire) = states();
        let track = TrackStore::builtin().get("monza").unwrap().clone();
        let spec = CompoundTable::builtin().get(Compound::Soft).clone();
        let fv = build(&race, &tire, &track, &spec);

        assert_eq!(fv.as_slice().len(), NUM_FEATURES);
        assert_eq!(fv.get("remaining_laps"), Some(33.0));
        assert_eq!(fv.get("tire_life_fraction"), Some(0.5));
        assert_eq!(fv.get("nominal_laps_left"), Some(10.0));
        assert_eq!(fv.get("gap_behind"), Some(NO_GAP));
        assert_eq!(fv.get("track_high_speed"), Some(1.0));
        assert_eq!(fv.get("track_street"), Some(0.0));
        assert_eq!(fv.get("tire_age_x_lap"), Some(200.0));
        assert!((fv.get("overtaking_x_safety_car").unwrap() - 0.25 * 0.35).abs() < 1e-12);
        assert_eq!(fv.get("nonexistent"), None);
    }

    #[test]
    fn lap_progress_is_not_a_feature() {
        let (mut race, tire) = states();
        let track = TrackStore::builtin().get("monza").unwrap().clone();
        let spec = CompoundTable::builtin().get(Compound::Soft).clone();
        let mid_lap = build(&race, &tire, &track, &spec);
        race.lap_progress = 0.0;
        assert_eq!(build(&race, &tire, &track, &spec), mid_lap);
        assert_eq!(mid_lap.get("lap_progress"), None);
    }

    #[test]
    fn deterministic() {
        let (race, tire) = states();
        let track = TrackStore::builtin().get("spa").unwrap().clone();
        let spec = CompoundTable::builtin().get(Compound::Soft).clone();
        assert_eq!(build(&race, &tire, &track, &spec), build(&race, &tire, &track, &spec));
    }
}
