mod data;
mod export;
mod model;
mod strategy;

use std::env;
use std::error::Error;

use tracing::info;
use tracing_subscriber::EnvFilter;

use data::LapDataset;
use model::{mean_absolute_error, CompoundMeanModel, LapTimePredictor, LinearLapModel};
use strategy::{
    Compound, LapCompound, SimulationConfig, Stint, StrategyDefinition, StrategySimulator,
};

const DEFAULT_DATASET: &str = "bahrain_top5_laps_2019_2024.csv";
const TRAIN_RATIO: f64 = 0.8;
const BASE_POSITION: u32 = 1;

// Candidate plans for the 57-lap race distance. Static configuration; the
// comparator never invents plans on its own.
fn strategy_catalog() -> Vec<StrategyDefinition> {
    vec![
        StrategyDefinition::new(
            "Soft → Hard",
            vec![Stint::new(Compound::Soft, 17), Stint::new(Compound::Hard, 40)],
        ),
        StrategyDefinition::new(
            "Hard → Soft",
            vec![Stint::new(Compound::Hard, 35), Stint::new(Compound::Soft, 22)],
        ),
        StrategyDefinition::new(
            "Soft → Hard → Soft",
            vec![
                Stint::new(Compound::Soft, 15),
                Stint::new(Compound::Hard, 27),
                Stint::new(Compound::Soft, 15),
            ],
        ),
    ]
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Usage: pitwall [dataset.csv] [linear|mean]
    let args: Vec<String> = env::args().collect();
    let dataset_path = args.get(1).map(String::as_str).unwrap_or(DEFAULT_DATASET);
    let model_name = args.get(2).map(String::as_str).unwrap_or("linear");

    let dataset = LapDataset::from_path(dataset_path)?;
    if dataset.laps.is_empty() {
        return Err(format!("no usable laps in {dataset_path}").into());
    }

    let (train, holdout) = dataset.split(TRAIN_RATIO);
    let predictor: Box<dyn LapTimePredictor> = match model_name {
        "linear" => Box::new(LinearLapModel::fit(train)?),
        "mean" => Box::new(CompoundMeanModel::fit(train)?),
        other => {
            return Err(format!("unknown model '{other}' (expected 'linear' or 'mean')").into())
        }
    };
    let mae = mean_absolute_error(predictor.as_ref(), holdout)?;
    info!(
        model = predictor.name(),
        "hold-out MAE {:.3}s over {} laps",
        mae,
        holdout.len()
    );

    let simulator = StrategySimulator::new(SimulationConfig::default());
    let catalog = strategy_catalog();
    let outcome = simulator.compare(&catalog, predictor.as_ref(), BASE_POSITION);

    println!("\n--- Strategy comparison ({} model) ---", predictor.name());
    for result in &outcome.results {
        println!(
            "- {:20} : {:8.2}s ({} stops)",
            result.strategy,
            result.total_time_sec,
            result
                .laps
                .iter()
                .filter(|lap| lap.compound == LapCompound::Pit)
                .count()
        );
    }
    for failure in &outcome.failures {
        println!("! {:20} : failed ({})", failure.strategy, failure.error);
    }

    let best = outcome
        .best()
        .ok_or("every strategy failed to simulate")?;
    println!("\nBest strategy: {} ({:.2}s)", best.strategy, best.total_time_sec);

    export::write_lap_records("outputs/strategy_lap_predictions.csv", outcome.lap_records())?;
    export::write_lap_records("outputs/best_strategy_lap_times.csv", &best.laps)?;
    info!("saved lap-by-lap traces to outputs/");

    Ok(())
}
