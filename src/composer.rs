use crate::heuristic::{PitWindow, HEURISTIC_CONFIDENCE};
use crate::regression::ModelEstimate;
use crate::risk::RiskLevel;
use crate::state::{RaceState, TireState};
use crate::tire::CompoundSpec;
use crate::track::TrackProfile;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    Model,
    Heuristic,
}

/// What the driver should be told. Overrides the window when risk is high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Recommendation {
    PitNow,
    PitWithin { laps: u32 },
    FollowWindow,
}

/// Tire condition on the current lap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TireAssessment {
    pub degradation: f64,
    pub fuel_effect: f64,
    pub risk: RiskLevel,
}

pub enum WindowEstimate {
    Model(ModelEstimate),
    Heuristic(PitWindow),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub optimal_pit_lap: u32,
    pub laps_until_pit: f64,
    pub pit_window: PitWindow,
    pub confidence: f64,
    pub uncertainty: f64,
    pub degradation: f64,
    pub fuel_effect: f64,
    pub risk: RiskLevel,
    pub source: PredictionSource,
    pub recommendation: Recommendation,
    pub warnings: Vec<String>,
}

impl PredictionResult {
    /// One-line advice. Urgent risk takes precedence over the window.
    pub fn summary(&self) -> String {
        match self.recommendation {
            Recommendation::PitNow => format!("BOX NOW: {} tire risk", self.risk),
            Recommendation::PitWithin { laps } => {
                format!("Box within {laps} laps: {} tire risk", self.risk)
            }
            Recommendation::FollowWindow => format!(
                "Pit on lap {} (window {}-{}, confidence {:.0}%)",
                self.optimal_pit_lap,
                self.pit_window.start_lap,
                self.pit_window.end_lap,
                self.confidence * 100.0
            ),
        }
    }
}

/// Flat output record for callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutput {
    pub optimal_pit_lap: u32,
    pub laps_until_pit: f64,
    pub pit_window_start: u32,
    pub pit_window_end: u32,
    pub confidence: f64,
    pub uncertainty: f64,
}

impl From<&PredictionResult> for PredictionOutput {
    fn from(r: &PredictionResult) -> Self {
        Self {
            optimal_pit_lap: r.optimal_pit_lap,
            laps_until_pit: r.laps_until_pit,
            pit_window_start: r.pit_window.start_lap,
            pit_window_end: r.pit_window.end_lap,
            confidence: r.confidence,
            uncertainty: r.uncertainty,
        }
    }
}

fn recommendation(risk: RiskLevel) -> Recommendation {
    if !risk.requires_pit() {
        Recommendation::FollowWindow
    } else if risk == RiskLevel::Critical {
        Recommendation::PitNow
    } else {
        Recommendation::PitWithin { laps: 2 }
    }
}

fn warnings(
    race: &RaceState,
    tire: &TireState,
    spec: &CompoundSpec,
    track: &TrackProfile,
    assessment: &TireAssessment,
) -> Vec<String> {
    let mut out = Vec::new();
    if tire.age >= spec.critical_age {
        out.push(format!("CRITICAL: {} tires are beyond critical age", tire.compound));
    } else if tire.age >= spec.warning_age {
        out.push(format!("WARNING: {} tires are nearing critical age", tire.compound));
    }

    if assessment.degradation >= 0.9 {
        out.push("CRITICAL: extreme tire degradation".to_string());
    } else if assessment.degradation >= 0.7 {
        out.push("WARNING: high tire degradation".to_string());
    }

    if assessment.fuel_effect > 1.4 {
        out.push("CAUTION: high fuel load significantly affecting tire performance".to_string());
    } else if assessment.fuel_effect > 1.2 {
        out.push("INFO: moderate fuel effect on tire performance".to_string());
    }

    if track.safety_car_probability > 0.4 {
        out.push("High safety car probability: keep strategy flexible".to_string());
    }
    if track.overtaking_difficulty > 0.7 && race.remaining_laps() > 10 {
        out.push("Difficult overtaking: track position is crucial".to_string());
    }
    out
}

pub fn compose(
    race: &RaceState,
    tire: &TireState,
    spec: &CompoundSpec,
    track: &TrackProfile,
    assessment: TireAssessment,
    estimate: WindowEstimate,
) -> PredictionResult {
    let (source, window, laps_until_pit, confidence, uncertainty) = match estimate {
        WindowEstimate::Model(m) => (PredictionSource::Model, m.window, m.laps_until_pit, m.confidence, m.uncertainty),
        WindowEstimate::Heuristic(w) => (
            PredictionSource::Heuristic,
            w,
            f64::from(w.optimal_lap.saturating_sub(race.current_lap)),
            HEURISTIC_CONFIDENCE,
            w.half_width(),
        ),
    };

    PredictionResult {
        optimal_pit_lap: window.optimal_lap,
        laps_until_pit,
        pit_window: window,
        confidence,
        uncertainty,
        degradation: assessment.degradation,
        fuel_effect: assessment.fuel_effect,
        risk: assessment.risk,
        source,
        recommendation: recommendation(assessment.risk),
        warnings: warnings(race, tire, spec, track, &assessment),
    }
}
