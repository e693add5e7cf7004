use crate::error::{PitError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const MIN_DEG_FACTOR: f64 = 0.1;
const MAX_DEG_FACTOR: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackType {
    Street,
    HighSpeed,
    Technical,
}

/// Per-circuit constants. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackProfile {
    pub track_id: String,
    pub length_km: f64,
    pub total_laps: u32,
    pub tire_deg_factor: f64,
    /// Grip gained per lap as rubber is laid down.
    pub track_evolution: f64,
    pub overtaking_difficulty: f64,
    pub safety_car_probability: f64,
    pub track_type: TrackType,
}

impl TrackProfile {
    pub fn validate(&self) -> Result<()> {
        if self.total_laps == 0 {
            return Err(PitError::validation("total_laps", self.total_laps, "must be positive"));
        }
        if self.length_km <= 0.0 {
            return Err(PitError::validation("length_km", self.length_km, "must be positive"));
        }
        if !(MIN_DEG_FACTOR..=MAX_DEG_FACTOR).contains(&self.tire_deg_factor) {
            return Err(PitError::validation(
                "tire_deg_factor",
                self.tire_deg_factor,
                format!("must be in [{MIN_DEG_FACTOR}, {MAX_DEG_FACTOR}]"),
            ));
        }
        if self.track_evolution < 0.0 {
            return Err(PitError::validation("track_evolution", self.track_evolution, "must be >= 0"));
        }
        if !(0.0..=1.0).contains(&self.overtaking_difficulty) {
            return Err(PitError::validation(
                "overtaking_difficulty",
                self.overtaking_difficulty,
                "must be in [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.safety_car_probability) {
            return Err(PitError::validation(
                "safety_car_probability",
                self.safety_car_probability,
                "must be in [0, 1]",
            ));
        }
        Ok(())
    }
}

fn profile(
    track_id: &str,
    length_km: f64,
    total_laps: u32,
    tire_deg_factor: f64,
    track_evolution: f64,
    overtaking_difficulty: f64,
    safety_car_probability: f64,
    track_type: TrackType,
) -> TrackProfile {
    TrackProfile {
        track_id: track_id.to_string(),
        length_km,
        total_laps,
        tire_deg_factor,
        track_evolution,
        overtaking_difficulty,
        safety_car_probability,
        track_type,
    }
}

/// Track lookup keyed by a normalized id ("Saudi Arabia" -> "saudi_arabia").
#[derive(Debug, Clone)]
pub struct TrackStore {
    tracks: HashMap<String, TrackProfile>,
}

pub fn normalize_track_id(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

impl TrackStore {
    pub fn builtin() -> Self {
        use TrackType::*;
        // 2022-2023 season characteristics
        let table = vec![
            profile("bahrain", 5.412, 57, 1.3, 0.09, 0.5, 0.45, Technical),
            profile("saudi_arabia", 6.174, 50, 1.1, 0.08, 0.7, 0.65, Street),
            profile("australia", 5.278, 58, 1.2, 0.08, 0.7, 0.50, Street),
            profile("japan", 5.807, 53, 1.25, 0.07, 0.6, 0.40, Technical),
            profile("china", 5.451, 56, 1.35, 0.09, 0.4, 0.35, Technical),
            profile("monza", 5.793, 53, 1.3, 0.08, 0.25, 0.35, HighSpeed),
            profile("spa", 7.004, 44, 1.25, 0.09, 0.30, 0.40, HighSpeed),
            profile("silverstone", 5.891, 52, 1.2, 0.07, 0.35, 0.30, Technical),
        ];
        Self {
            tracks: table.into_iter().map(|t| (t.track_id.clone(), t)).collect(),
        }
    }

    /// Builtin table extended (or overridden) by caller-supplied profiles.
    pub fn with_overrides(overrides: &[TrackProfile]) -> Result<Self> {
        let mut store = Self::builtin();
        for track in overrides {
            track.validate()?;
            let mut track = track.clone();
            track.track_id = normalize_track_id(&track.track_id);
            store.tracks.insert(track.track_id.clone(), track);
        }
        Ok(store)
    }

    pub fn get(&self, name: &str) -> Result<&TrackProfile> {
        self.tracks
            .get(&normalize_track_id(name))
            .ok_or_else(|| PitError::InvalidTrack {
                track: name.to_string(),
            })
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tracks.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for TrackStore {
    fn default() -> Self {
        Self::builtin()
    }
}
