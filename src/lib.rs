//! Pit-window prediction for a car on track.
//!
//! Combines a fuel-aware tire degradation model, a risk classifier, a
//! closed-form window heuristic and a boosted-tree regression model trained
//! per track on historical stints.

pub mod calibration;
pub mod composer;
pub mod config;
pub mod data;
pub mod degradation;
pub mod engine;
pub mod error;
pub mod features;
pub mod fuel;
pub mod gbdt;
pub mod heuristic;
pub mod regression;
pub mod risk;
pub mod state;
pub mod tire;
pub mod track;

pub use composer::{PredictionOutput, PredictionResult, PredictionSource, Recommendation};
pub use config::{EngineConfig, MissingModelPolicy};
pub use data::{CsvLapSource, HistoricalDataSource, SessionRecord};
pub use engine::PitWindowEngine;
pub use error::{PitError, Result};
pub use heuristic::PitWindow;
pub use risk::RiskLevel;
pub use state::{PredictionInput, RaceState, TireState};
pub use tire::{Compound, CompoundSpec};
pub use track::{TrackProfile, TrackType};
