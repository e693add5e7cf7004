use crate::error::{PitError, Result};
use crate::features::{self, FeatureVector};
use crate::state::{RaceState, TireState, NO_GAP};
use crate::tire::{Compound, CompoundTable};
use crate::track::{normalize_track_id, TrackProfile};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// lap-time growth per lap (fraction of the stint's first lap) that maps to a
// degradation factor of 1.0
const REFERENCE_DEG_RATE: f64 = 0.001;

// column names follow the timing export
#[derive(Debug, Deserialize)]
struct RawLapData {
    #[serde(rename = "Driver")] driver: String,
    #[serde(rename = "LapNumber")] lap_number: f64,
    #[serde(rename = "Compound")] compound: String,
    #[serde(rename = "TyreLife")] tyre_life: f64,
    #[serde(rename = "LapTimeSeconds")] lap_time_seconds: Option<f64>,
    #[serde(rename = "TrackTemp")] track_temp: Option<f64>,
    #[serde(rename = "AirTemp")] air_temp: Option<f64>,
    #[serde(rename = "Humidity")] humidity: Option<f64>,
    #[serde(rename = "Position")] position: Option<f64>,
    #[serde(rename = "GapAhead", default)] gap_ahead: Option<f64>,
    #[serde(rename = "GapBehind", default)] gap_behind: Option<f64>,
    #[serde(rename = "PitOutTime", default)] pit_out_time: Option<String>,
    #[serde(rename = "PitInTime", default)] pit_in_time: Option<String>,
}

/// One cleaned lap of one driver.
#[derive(Debug, Clone)]
pub struct LapRecord {
    pub driver: String,
    pub lap_number: u32,
    pub compound: String,
    pub tyre_life: u32,
    pub lap_time_seconds: f64,
    pub track_temp: f64,
    pub air_temp: f64,
    pub humidity: f64,
    pub position: Option<u32>,
    pub gap_ahead: Option<f64>,
    pub gap_behind: Option<f64>,
    /// Lap time minus the driver's best clean lap of the session.
    pub time_delta: f64,
    pub is_pit_out_lap: bool,
    pub is_pit_in_lap: bool,
}

impl LapRecord {
    pub fn is_clean(&self) -> bool {
        !self.is_pit_in_lap && !self.is_pit_out_lap && self.time_delta.is_finite()
    }
}

/// A race session, laps grouped per driver and sorted by lap number.
#[derive(Debug, Clone, Default)]
pub struct SessionRecord {
    pub track: String,
    pub year: u16,
    pub driver_laps: HashMap<String, Vec<LapRecord>>,
}

impl SessionRecord {
    /// Groups laps by driver, sorts them and fills in `time_delta`.
    pub fn from_laps(track: &str, year: u16, laps: Vec<LapRecord>) -> Self {
        let mut unsorted: HashMap<String, Vec<LapRecord>> = HashMap::new();
        for lap in laps {
            unsorted.entry(lap.driver.clone()).or_default().push(lap);
        }

        let mut driver_laps = HashMap::new();
        for (driver, mut laps) in unsorted {
            laps.sort_by_key(|d| d.lap_number);
            let best = laps
                .iter()
                .filter(|d| !d.is_pit_in_lap && !d.is_pit_out_lap)
                .map(|d| d.lap_time_seconds)
                .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
                .unwrap_or(0.0);
            laps.iter_mut()
                .for_each(|lap| lap.time_delta = lap.lap_time_seconds - best);
            driver_laps.insert(driver, laps);
        }
        Self {
            track: track.to_string(),
            year,
            driver_laps,
        }
    }

    pub fn lap_count(&self) -> usize {
        self.driver_laps.values().map(Vec::len).sum()
    }
}

/// Supplier of historical race sessions. Caching, if any, is the source's business.
pub trait HistoricalDataSource {
    fn fetch_races(&self, track: &str, years: &[u16]) -> Result<Vec<SessionRecord>>;
}

/// Reads `<root>/<track_id>_<year>.csv` timing exports.
#[derive(Debug, Clone)]
pub struct CsvLapSource {
    root: PathBuf,
}

impl CsvLapSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn session_path(&self, track: &str, year: u16) -> PathBuf {
        self.root.join(format!("{}_{}.csv", normalize_track_id(track), year))
    }

    pub fn read_session<P: AsRef<Path>>(path: P, track: &str, year: u16) -> Result<SessionRecord> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
        let mut laps = Vec::new();
        let mut skipped = 0usize;

        for res in reader.deserialize() {
            let raw: RawLapData = res?;
            let lap_time = raw.lap_time_seconds.unwrap_or(0.0);
            let track_temp = raw.track_temp.unwrap_or(0.0);
            if lap_time > 0.0 && lap_time < 300.0 && track_temp > 0.0 &&
               raw.tyre_life >= 0.0 && raw.lap_number >= 1.0 && !raw.driver.is_empty() && !raw.compound.is_empty()
            {
                laps.push(LapRecord {
                    driver: raw.driver,
                    lap_number: raw.lap_number.round() as u32,
                    compound: raw.compound.trim().to_uppercase(),
                    tyre_life: raw.tyre_life.round() as u32,
                    lap_time_seconds: lap_time,
                    track_temp,
                    air_temp: raw.air_temp.unwrap_or(track_temp),
                    humidity: raw.humidity.unwrap_or(50.0),
                    position: raw.position.filter(|p| *p >= 1.0).map(|p| p.round() as u32),
                    gap_ahead: raw.gap_ahead,
                    gap_behind: raw.gap_behind,
                    time_delta: 0.0,
                    is_pit_out_lap: raw.pit_out_time.is_some_and(|s| !s.trim().is_empty()),
                    is_pit_in_lap: raw.pit_in_time.is_some_and(|s| !s.trim().is_empty()),
                });
            } else {
                skipped += 1;
            }
        }
        debug!(track, year, kept = laps.len(), skipped, "read session");
        Ok(SessionRecord::from_laps(track, year, laps))
    }
}

impl HistoricalDataSource for CsvLapSource {
    fn fetch_races(&self, track: &str, years: &[u16]) -> Result<Vec<SessionRecord>> {
        let mut sessions = Vec::new();
        for &year in years {
            let path = self.session_path(track, year);
            match Self::read_session(&path, track, year) {
                Ok(session) if session.lap_count() > 0 => sessions.push(session),
                Ok(_) => warn!(track, year, path = %path.display(), "session has no usable laps"),
                Err(e) => warn!(track, year, path = %path.display(), error = %e, "could not load session"),
            }
        }
        info!(track, loaded = sessions.len(), requested = years.len(), "fetched historical races");
        Ok(sessions)
    }
}

/// Splits one driver's sorted laps into stints. A stint ends on a pit-in lap,
/// before a pit-out lap, on a compound change, or at the last lap.
pub fn split_stints(laps: &[LapRecord]) -> Vec<&[LapRecord]> {
    let mut stints = Vec::new();
    let mut start = 0;
    for i in 0..laps.len() {
        let curr = &laps[i];
        let next = laps.get(i + 1);
        let is_stint_end = match next {
            None => true,
            Some(n) => curr.is_pit_in_lap || n.is_pit_out_lap || n.compound != curr.compound,
        };
        if is_stint_end {
            stints.push(&laps[start..=i]);
            start = i + 1;
        }
    }
    stints
}

/// Mean stint length per dry compound across all sessions.
pub fn average_stint_lengths(sessions: &[SessionRecord]) -> HashMap<Compound, f64> {
    let mut lengths: HashMap<Compound, Vec<usize>> = HashMap::new();
    for session in sessions {
        for laps in session.driver_laps.values() {
            for stint in split_stints(laps) {
                if let Ok(compound) = stint[0].compound.parse::<Compound>() {
                    lengths.entry(compound).or_default().push(stint.len());
                }
            }
        }
    }
    lengths
        .into_iter()
        .map(|(c, l)| (c, l.iter().sum::<usize>() as f64 / l.len() as f64))
        .collect()
}

/// Feature vector plus observed label (laps remaining in the stint).
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub features: FeatureVector,
    pub label: f64,
}

/// One sample per clean dry-compound lap. The label counts the laps left in
/// the stint including the current one, capped by the compound's life.
pub fn training_samples(
    sessions: &[SessionRecord],
    track: &TrackProfile,
    compounds: &CompoundTable,
) -> Vec<TrainingSample> {
    let mut samples = Vec::new();
    for session in sessions {
        for laps in session.driver_laps.values() {
            for stint in split_stints(laps) {
                let Ok(compound) = stint[0].compound.parse::<Compound>() else {
                    continue;
                };
                let spec = compounds.get(compound);
                let cap = spec.max_life.saturating_sub(5);

                for (i, lap) in stint.iter().enumerate() {
                    if !lap.is_clean() || lap.tyre_life > spec.max_life {
                        continue;
                    }
                    let Some(position) = lap.position.filter(|p| (1..=20).contains(p)) else {
                        continue;
                    };
                    if lap.lap_number > track.total_laps {
                        continue;
                    }
                    let remaining = (stint.len() - i) as u32;
                    let label = remaining.min(cap).min(spec.max_life - lap.tyre_life);

                    let race = RaceState {
                        current_lap: lap.lap_number,
                        total_laps: track.total_laps,
                        position,
                        gap_ahead: lap.gap_ahead.unwrap_or(NO_GAP).max(NO_GAP),
                        gap_behind: lap.gap_behind.unwrap_or(NO_GAP).max(NO_GAP),
                        lap_progress: 0.0,
                    };
                    let tire = TireState {
                        compound,
                        age: lap.tyre_life,
                        last_lap_time_seconds: lap.lap_time_seconds,
                        track_temp_c: lap.track_temp,
                        air_temp_c: lap.air_temp,
                        humidity: lap.humidity.clamp(0.0, 100.0),
                    };
                    samples.push(TrainingSample {
                        features: features::build(&race, &tire, track, spec),
                        label: f64::from(label),
                    });
                }
            }
        }
    }
    samples
}

/// Track characteristics measured from historical sessions.
#[derive(Debug, Clone)]
pub struct TrackCharacteristics {
    pub tire_deg_factor: f64,
    pub track_evolution: f64,
    pub overtaking_difficulty: f64,
    pub average_stint_lengths: HashMap<Compound, f64>,
    pub stints_analyzed: usize,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Measures degradation, evolution and overtaking difficulty, keeping the
/// base profile's value for anything the data cannot support.
pub fn derive_characteristics(
    base: &TrackProfile,
    sessions: &[SessionRecord],
) -> Result<TrackCharacteristics> {
    if sessions.is_empty() {
        return Err(PitError::InsufficientData {
            track: base.track_id.clone(),
            reason: "no historical sessions".into(),
        });
    }

    let mut deg_rates = Vec::new();
    let mut evolution = Vec::new();
    let mut position_changes = Vec::new();

    for session in sessions {
        for laps in session.driver_laps.values() {
            for stint in split_stints(laps) {
                if stint[0].compound.parse::<Compound>().is_err() {
                    continue;
                }
                let clean: Vec<&LapRecord> = stint.iter().filter(|l| l.is_clean()).collect();
                if clean.len() < 3 {
                    continue;
                }
                let first = clean[0].lap_time_seconds;
                let last = clean[clean.len() - 1].lap_time_seconds;
                deg_rates.push((last / first - 1.0) / clean.len() as f64);
            }

            let clean: Vec<&LapRecord> = laps.iter().filter(|l| l.is_clean()).collect();
            for pair in clean.windows(2) {
                if pair[1].lap_number == pair[0].lap_number + 1 {
                    let change = pair[1].lap_time_seconds / pair[0].lap_time_seconds - 1.0;
                    evolution.push(-change);
                }
            }

            let positions: Vec<u32> = laps.iter().filter_map(|l| l.position).collect();
            if let (Some(first), Some(last)) = (positions.first(), positions.last()) {
                position_changes.push((f64::from(*last) - f64::from(*first)).abs());
            }
        }
    }

    let tire_deg_factor = mean(&deg_rates)
        .map(|r| (r / REFERENCE_DEG_RATE).clamp(0.5, 2.0))
        .unwrap_or(base.tire_deg_factor);
    let track_evolution = mean(&evolution)
        .map(|e| e.max(0.0))
        .unwrap_or(base.track_evolution);
    let overtaking_difficulty = mean(&position_changes)
        .map(|c| 1.0 / (1.0 + c / 10.0))
        .unwrap_or(base.overtaking_difficulty);

    Ok(TrackCharacteristics {
        tire_deg_factor,
        track_evolution,
        overtaking_difficulty,
        average_stint_lengths: average_stint_lengths(sessions),
        stints_analyzed: deg_rates.len(),
    })
}
