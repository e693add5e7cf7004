use crate::config::WindowVariant;
use crate::state::RaceState;
use crate::tire::{Compound, CompoundSpec};
use crate::track::{TrackProfile, TrackType};
use serde::{Deserialize, Serialize};

/// Confidence reported for heuristic results; below any model confidence.
pub const HEURISTIC_CONFIDENCE: f64 = 0.5;

/// Recommended pit window, all laps within `[current_lap + 1, total_laps]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitWindow {
    pub start_lap: u32,
    pub optimal_lap: u32,
    pub end_lap: u32,
}

impl PitWindow {
    /// Window of `early` laps before and `late` laps after `optimal`, clipped
    /// to the race. Collapsed windows fall back to a short fixed one.
    pub fn around(race: &RaceState, optimal: i64, early: i64, late: i64) -> Self {
        let current = i64::from(race.current_lap);
        let total = i64::from(race.total_laps);
        let first = current + 1;
        let last = (total - 1).max(first);

        let optimal = optimal.clamp(first, last);
        let start = (optimal - early).max(first);
        let end = (optimal + late).min(last);

        if start >= end {
            let clip = |lap: i64| lap.min(total).max(first) as u32;
            return Self {
                start_lap: clip(current + 1),
                optimal_lap: clip(current + 3),
                end_lap: clip(current + 5),
            };
        }
        Self {
            start_lap: start as u32,
            optimal_lap: optimal as u32,
            end_lap: end as u32,
        }
    }

    /// Half of the window's span in laps.
    pub fn half_width(&self) -> f64 {
        f64::from(self.end_lap - self.start_lap) / 2.0
    }
}

fn evolution_bonus(track_evolution: f64) -> i64 {
    if track_evolution >= 0.09 {
        3
    } else if track_evolution >= 0.08 {
        2
    } else {
        1
    }
}

/// Laps either side of the optimum for the heuristic window.
pub fn heuristic_half_width(track: &TrackProfile) -> i64 {
    let mut size = match track.track_type {
        TrackType::HighSpeed => 3,
        TrackType::Technical => 2,
        TrackType::Street => 1,
    };
    if track.overtaking_difficulty < 0.3 {
        size += 1;
    }
    if track.safety_car_probability > 0.35 {
        size += 1;
    }
    size
}

/// Laps either side of a model-predicted optimum. Starts from the heuristic
/// width, adjusts for compound and widens where passing is hard or a safety
/// car is likely.
pub fn model_half_width(track: &TrackProfile, compound: Compound) -> i64 {
    let mut size = heuristic_half_width(track);
    match compound {
        Compound::Soft => size = (size - 1).max(1),
        Compound::Hard => size += 1,
        Compound::Medium => {}
    }
    if track.overtaking_difficulty > 0.7 {
        size += 1;
    }
    if track.safety_car_probability > 0.5 {
        size += 1;
    }
    size
}

/// Closed-form pit window used when no trained model is available.
#[derive(Debug, Clone)]
pub struct HeuristicCalculator {
    variant: WindowVariant,
}

impl HeuristicCalculator {
    pub fn new(variant: WindowVariant) -> Self {
        Self { variant }
    }

    pub fn window(
        &self,
        race: &RaceState,
        tire_age: u32,
        spec: &CompoundSpec,
        degradation: f64,
        track: &TrackProfile,
    ) -> PitWindow {
        match self.variant {
            WindowVariant::Canonical => canonical(race, tire_age, spec, track),
            WindowVariant::DegradationScaled => degradation_scaled(race, degradation, track),
        }
    }
}

impl Default for HeuristicCalculator {
    fn default() -> Self {
        Self::new(WindowVariant::Canonical)
    }
}

fn canonical(race: &RaceState, tire_age: u32, spec: &CompoundSpec, track: &TrackProfile) -> PitWindow {
    let current = i64::from(race.current_lap);
    let total = i64::from(race.total_laps);
    let first = current + 1;
    let upper = (total - 5).max(first);

    // a stint longer than the race is no different from one lasting the race
    let stint = (f64::from(spec.max_life) / track.tire_deg_factor).floor().min(total as f64);
    let base_window = stint as i64 + evolution_bonus(track.track_evolution);
    let mut optimal = (current + base_window - i64::from(tire_age)).clamp(first, upper);

    if track.tire_deg_factor > 1.25 {
        optimal = (optimal - 2).max(first);
    }
    if track.track_evolution >= 0.09 {
        optimal = (optimal + 1).min(upper);
    }

    let half = heuristic_half_width(track);
    PitWindow::around(race, optimal, half, half)
}

fn degradation_scaled(race: &RaceState, degradation: f64, track: &TrackProfile) -> PitWindow {
    let current = i64::from(race.current_lap);
    let total = i64::from(race.total_laps);

    let extension = (15.0 * (1.0 - degradation)).floor() as i64;
    let optimal = (current + extension).min(total - 10).max(current + 5);
    let half = (10.0 * (1.0 - track.overtaking_difficulty)).floor() as i64;
    PitWindow::around(race, optimal, half, half)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::NO_GAP;
    use crate::tire::CompoundTable;
    use crate::track::TrackStore;

    fn race(current_lap: u32, total_laps: u32) -> RaceState {
        RaceState {
            current_lap,
            total_laps,
            position: 8,
            gap_ahead: NO_GAP,
            gap_behind: NO_GAP,
            lap_progress: 0.0,
        }
    }

    fn assert_well_formed(w: &PitWindow, r: &RaceState) {
        assert!(w.start_lap <= w.optimal_lap && w.optimal_lap <= w.end_lap, "{w:?}");
        assert!(w.start_lap > r.current_lap, "{w:?} at lap {}", r.current_lap);
        assert!(w.end_lap <= r.total_laps, "{w:?}");
    }

    #[test]
    fn monza_medium_example() {
        let track = TrackStore::builtin().get("monza").unwrap().clone();
        let spec = CompoundTable::builtin().get(Compound::Medium).clone();
        let r = race(15, 53);
        // base = floor(30 / 1.3) + 2 = 25; optimal = 15 + 25 - 8 = 32; deg factor > 1.25 => 30
        let w = HeuristicCalculator::default().window(&r, 8, &spec, 0.2, &track);
        assert_eq!(w.optimal_lap, 30);
        // high-speed 3, easy overtaking +1
        assert_eq!((w.start_lap, w.end_lap), (26, 34));
    }

    #[test]
    fn high_evolution_moves_optimum_later() {
        let track = TrackStore::builtin().get("spa").unwrap().clone();
        let spec = CompoundTable::builtin().get(Compound::Hard).clone();
        let r = race(5, 44);
        // base = floor(40 / 1.25) + 3 = 35; 5 + 35 - 2 = 38; evolution bonus lap => 39 (= total - 5)
        let w = HeuristicCalculator::default().window(&r, 2, &spec, 0.1, &track);
        assert_eq!(w.optimal_lap, 39);
        assert_well_formed(&w, &r);
    }

    #[test]
    fn well_formed_across_every_track_and_state() {
        let tracks = TrackStore::builtin();
        let compounds = CompoundTable::builtin();
        for variant in [WindowVariant::Canonical, WindowVariant::DegradationScaled] {
            let calc = HeuristicCalculator::new(variant);
            for id in tracks.ids() {
                let track = tracks.get(id).unwrap();
                for c in Compound::ALL {
                    let spec = compounds.get(c);
                    for lap in 1..track.total_laps {
                        for age in [0, spec.max_life / 2, spec.max_life] {
                            for deg in [0.0, 0.5, 1.0] {
                                let r = race(lap, track.total_laps);
                                let w = calc.window(&r, age, spec, deg, track);
                                assert_well_formed(&w, &r);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn near_zero_degradation_keeps_window_inside_race() {
        let mut track = TrackStore::builtin().get("monza").unwrap().clone();
        track.tire_deg_factor = 1e-18;
        let spec = CompoundTable::builtin().get(Compound::Medium).clone();
        let r = race(10, 53);
        let w = HeuristicCalculator::default().window(&r, 8, &spec, 0.1, &track);
        assert_eq!(w.optimal_lap, 48);
        assert_well_formed(&w, &r);
    }

    #[test]
    fn collapsed_window_falls_back_to_fixed_offsets() {
        let r = race(10, 53);
        let w = PitWindow::around(&r, 12, 0, 0);
        assert_eq!((w.start_lap, w.optimal_lap, w.end_lap), (11, 13, 15));
    }

    #[test]
    fn fallback_is_clipped_near_race_end() {
        let r = race(52, 53);
        let w = PitWindow::around(&r, 60, 2, 2);
        assert_eq!((w.start_lap, w.optimal_lap, w.end_lap), (53, 53, 53));
    }

    #[test]
    fn model_width_exceeds_heuristic_where_passing_is_hard() {
        let track = TrackStore::builtin().get("saudi arabia").unwrap().clone();
        assert!(model_half_width(&track, Compound::Medium) > heuristic_half_width(&track));
        assert!(model_half_width(&track, Compound::Soft) >= 1);
    }

    #[test]
    fn half_width_of_window() {
        let w = PitWindow {
            start_lap: 20,
            optimal_lap: 23,
            end_lap: 27,
        };
        assert_eq!(w.half_width(), 3.5);
    }
}
