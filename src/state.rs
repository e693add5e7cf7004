use crate::error::{PitError, Result};
use crate::tire::{Compound, CompoundSpec, CompoundTable};
use crate::track::TrackProfile;
use serde::{Deserialize, Serialize};

/// Sentinel for "no car ahead/behind".
pub const NO_GAP: f64 = -1.0;

const MAX_POSITION: u32 = 20;

/// Race situation of the car being advised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceState {
    pub current_lap: u32,
    pub total_laps: u32,
    pub position: u32,
    pub gap_ahead: f64,
    pub gap_behind: f64,
    pub lap_progress: f64,
}

impl RaceState {
    pub fn validate(&self) -> Result<()> {
        if self.current_lap < 1 {
            return Err(PitError::validation("current_lap", self.current_lap, "must be >= 1"));
        }
        if self.total_laps < self.current_lap {
            return Err(PitError::validation(
                "current_lap",
                self.current_lap,
                format!("beyond race distance of {} laps", self.total_laps),
            ));
        }
        if !(1..=MAX_POSITION).contains(&self.position) {
            return Err(PitError::validation("position", self.position, "must be in [1, 20]"));
        }
        if self.gap_ahead < NO_GAP || !self.gap_ahead.is_finite() {
            return Err(PitError::validation("gap_ahead", self.gap_ahead, "must be >= -1"));
        }
        if self.gap_behind < NO_GAP || !self.gap_behind.is_finite() {
            return Err(PitError::validation("gap_behind", self.gap_behind, "must be >= -1"));
        }
        if !(0.0..=1.0).contains(&self.lap_progress) {
            return Err(PitError::validation("lap_progress", self.lap_progress, "must be in [0, 1]"));
        }
        Ok(())
    }

    /// A pit window needs at least one lap after the current one.
    pub fn ensure_laps_remaining(&self) -> Result<()> {
        if self.current_lap >= self.total_laps {
            return Err(PitError::validation(
                "current_lap",
                self.current_lap,
                format!("no laps remain after lap {} of {}", self.current_lap, self.total_laps),
            ));
        }
        Ok(())
    }

    pub fn remaining_laps(&self) -> u32 {
        self.total_laps.saturating_sub(self.current_lap)
    }
}

/// Current tire set and the conditions it is running in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TireState {
    pub compound: Compound,
    pub age: u32,
    pub last_lap_time_seconds: f64,
    pub track_temp_c: f64,
    pub air_temp_c: f64,
    pub humidity: f64,
}

impl TireState {
    pub fn validate(&self, spec: &CompoundSpec) -> Result<()> {
        if self.age > spec.max_life {
            return Err(PitError::validation(
                "tire_age",
                self.age,
                format!("exceeds {} max life of {} laps", self.compound, spec.max_life),
            ));
        }
        if !(self.last_lap_time_seconds > 0.0) {
            return Err(PitError::validation(
                "last_lap_time_seconds",
                self.last_lap_time_seconds,
                "must be positive",
            ));
        }
        if !(0.0..=100.0).contains(&self.humidity) {
            return Err(PitError::validation("humidity", self.humidity, "must be in [0, 100]"));
        }
        Ok(())
    }
}

/// Prediction request as supplied by callers. Integer fields are signed so
/// out-of-range values reach validation instead of failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionInput {
    pub lap_number: i32,
    pub tire_life_laps: i32,
    pub compound: String,
    pub last_lap_time_seconds: f64,
    pub track_temp_c: f64,
    pub air_temp_c: f64,
    pub humidity: f64,
    pub position: i32,
    #[serde(default)]
    pub lap_progress: f64,
    #[serde(default)]
    pub gap_ahead: Option<f64>,
    #[serde(default)]
    pub gap_behind: Option<f64>,
}

impl PredictionInput {
    /// Validates the request against the track and compound tables.
    pub fn into_states(
        &self,
        track: &TrackProfile,
        compounds: &CompoundTable,
    ) -> Result<(RaceState, TireState)> {
        let compound: Compound = self.compound.parse()?;
        let age = non_negative("tire_age", self.tire_life_laps)?;
        let current_lap = non_negative("lap_number", self.lap_number)?;
        let position = non_negative("position", self.position)?;

        let race = RaceState {
            current_lap,
            total_laps: track.total_laps,
            position,
            gap_ahead: self.gap_ahead.unwrap_or(NO_GAP),
            gap_behind: self.gap_behind.unwrap_or(NO_GAP),
            lap_progress: self.lap_progress,
        };
        race.validate()?;

        let tire = TireState {
            compound,
            age,
            last_lap_time_seconds: self.last_lap_time_seconds,
            track_temp_c: self.track_temp_c,
            air_temp_c: self.air_temp_c,
            humidity: self.humidity,
        };
        tire.validate(compounds.get(compound))?;
        Ok((race, tire))
    }
}

pub(crate) fn non_negative(field: &'static str, value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| PitError::validation(field, value, "must not be negative"))
}
