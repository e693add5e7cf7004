use anyhow::{bail, Context, Result};
use pitwindow::{CsvLapSource, EngineConfig, PitWindowEngine, PredictionInput, PredictionOutput};
use std::env;
use std::fs;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage:
  pitwindow train <track> <data_dir> <year>...
  pitwindow predict <track> <request.json> [--json]
  pitwindow characteristics <track> <data_dir> <year>...
  pitwindow importance <track>
  pitwindow tracks";

fn parse_years(args: &[String]) -> Result<Vec<u16>> {
    if args.is_empty() {
        bail!("at least one year is required\n{USAGE}");
    }
    args.iter()
        .map(|y| y.parse::<u16>().with_context(|| format!("invalid year: {y}")))
        .collect()
}

fn load_config() -> Result<EngineConfig> {
    match env::var("PITWINDOW_CONFIG") {
        Ok(path) => EngineConfig::load(&path).with_context(|| format!("loading config {path}")),
        Err(_) => Ok(EngineConfig::default()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let engine = PitWindowEngine::new(load_config()?).context("building engine")?;

    match args.first().map(String::as_str) {
        Some("train") if args.len() >= 4 => {
            let years = parse_years(&args[3..])?;
            let source = CsvLapSource::new(&args[2]);
            let model = engine
                .train(&args[1], &years, &source)
                .with_context(|| format!("training {}", args[1]))?;

            println!("Trained {} on {} laps", model.track_id, model.metrics.train_samples);
            println!("- Validation samples: {}", model.metrics.valid_samples);
            println!("- Trees: {}", model.metrics.trees);
            println!("- MAE: {:.2} laps, RMSE: {:.2} laps", model.metrics.mae, model.metrics.rmse);
            if let Some(n) = model.degradation_normalizer {
                println!("- Calibrated degradation normalizer: {n:.3}");
            }
        }
        Some("predict") if args.len() >= 3 => {
            let raw = fs::read_to_string(&args[2]).with_context(|| format!("reading {}", args[2]))?;
            let input: PredictionInput = serde_json::from_str(&raw).context("parsing prediction request")?;
            let result = engine.predict(&args[1], &input)?;

            if args.iter().any(|a| a == "--json") {
                println!("{}", serde_json::to_string_pretty(&PredictionOutput::from(&result))?);
                return Ok(());
            }

            println!("{}", result.summary());
            println!(
                "Window: laps {}-{} (optimal {}, {:.1} laps away, +/-{:.1})",
                result.pit_window.start_lap,
                result.pit_window.end_lap,
                result.optimal_pit_lap,
                result.laps_until_pit,
                result.uncertainty
            );
            println!(
                "Tires: degradation {:.0}%, fuel effect x{:.2}, risk {}",
                result.degradation * 100.0,
                result.fuel_effect,
                result.risk
            );
            println!("Source: {:?}, confidence {:.0}%", result.source, result.confidence * 100.0);
            for w in &result.warnings {
                println!("  ! {w}");
            }
        }
        Some("characteristics") if args.len() >= 4 => {
            let years = parse_years(&args[3..])?;
            let source = CsvLapSource::new(&args[2]);
            let ch = engine.characteristics(&args[1], &years, &source)?;

            println!("Characteristics from {} stints:", ch.stints_analyzed);
            println!("- Tire degradation factor: {:.2}", ch.tire_deg_factor);
            println!("- Track evolution: {:.4}", ch.track_evolution);
            println!("- Overtaking difficulty: {:.2}", ch.overtaking_difficulty);
            let mut stints: Vec<_> = ch.average_stint_lengths.iter().collect();
            stints.sort_by_key(|(c, _)| **c);
            for (compound, avg) in stints {
                println!("- Avg {compound} stint: {avg:.1} laps");
            }
        }
        Some("importance") if args.len() >= 2 => {
            for (name, splits) in engine.feature_importance(&args[1])?.iter().filter(|(_, s)| *s > 0) {
                println!("{name:<28} {splits}");
            }
        }
        Some("tracks") => {
            for id in engine.tracks().ids() {
                println!("{id}");
            }
        }
        _ => bail!("{USAGE}"),
    }

    Ok(())
}
