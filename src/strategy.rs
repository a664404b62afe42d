use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{LapFeatures, LapTimePredictor, PredictionError};

// Output precision: totals carry two decimals, per-lap records three.
const TOTAL_TIME_PRECISION: u32 = 2;
const LAP_TIME_PRECISION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Compound {
    Soft,
    Medium,
    Hard,
}

impl Compound {
    // Encoding for the CompoundEncoded feature column. The fitted model and the
    // simulator must share this table, so it lives in exactly one place.
    pub fn code(self) -> u8 {
        match self {
            Compound::Soft => 0,
            Compound::Medium => 1,
            Compound::Hard => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Compound::Soft => "SOFT",
            Compound::Medium => "MEDIUM",
            Compound::Hard => "HARD",
        }
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compound {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SOFT" => Ok(Compound::Soft),
            "MEDIUM" => Ok(Compound::Medium),
            "HARD" => Ok(Compound::Hard),
            other => Err(ConfigurationError::UnknownCompound(other.to_string())),
        }
    }
}

// Compound column of a lap trace. PIT rows mark the stop itself and are never
// fed back into a predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LapCompound {
    Soft,
    Medium,
    Hard,
    Pit,
}

impl From<Compound> for LapCompound {
    fn from(compound: Compound) -> Self {
        match compound {
            Compound::Soft => LapCompound::Soft,
            Compound::Medium => LapCompound::Medium,
            Compound::Hard => LapCompound::Hard,
        }
    }
}

impl LapCompound {
    pub fn as_str(self) -> &'static str {
        match self {
            LapCompound::Soft => "SOFT",
            LapCompound::Medium => "MEDIUM",
            LapCompound::Hard => "HARD",
            LapCompound::Pit => "PIT",
        }
    }
}

impl fmt::Display for LapCompound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stint {
    pub compound: Compound,
    pub laps: u32,
}

impl Stint {
    pub fn new(compound: Compound, laps: u32) -> Self {
        Stint { compound, laps }
    }
}

// One candidate race plan: a display name and the ordered stints to run.
// Authored once as static configuration and only ever read afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyDefinition {
    pub name: String,
    pub stints: Vec<Stint>,
}

impl StrategyDefinition {
    pub fn new(name: impl Into<String>, stints: Vec<Stint>) -> Self {
        StrategyDefinition {
            name: name.into(),
            stints,
        }
    }

    pub fn race_laps(&self) -> u32 {
        self.stints.iter().map(|stint| stint.laps).sum()
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.stints.is_empty() {
            return Err(ConfigurationError::EmptyStrategy);
        }
        for (index, stint) in self.stints.iter().enumerate() {
            if stint.laps == 0 {
                return Err(ConfigurationError::EmptyStint {
                    index,
                    compound: stint.compound,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("strategy has no stints")]
    EmptyStrategy,
    #[error("stint {index} ({compound}) has a zero lap count")]
    EmptyStint { index: usize, compound: Compound },
    #[error("unknown tyre compound '{0}'")]
    UnknownCompound(String),
    #[error("base position must be at least 1 (got {0})")]
    InvalidBasePosition(u32),
}

// Failures carry the strategy name plus lap and stint coordinates so a bad run
// can be diagnosed without repeating it.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("strategy '{strategy}' is invalid: {source}")]
    Configuration {
        strategy: String,
        #[source]
        source: ConfigurationError,
    },
    #[error("strategy '{strategy}' failed on lap {lap} (stint {stint}): {source}")]
    Prediction {
        strategy: String,
        lap: u32,
        stint: usize,
        #[source]
        source: PredictionError,
    },
}

// Tuning knobs for the simulation, passed in explicitly rather than read from
// globals: 0.3% added pace per lap of tyre age, 20 s lost per stop.
#[derive(Debug, Clone, Copy)]
pub struct SimulationConfig {
    pub degradation_coefficient: f64,
    pub pit_stop_penalty: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            degradation_coefficient: 0.003,
            pit_stop_penalty: 20.0,
        }
    }
}

// Multiplicative tyre-wear penalty: factor(age) = 1 + coefficient * age.
// A fresh tyre (age 0) runs at exactly the model's base pace.
#[derive(Debug, Clone, Copy)]
pub struct DegradationModel {
    coefficient: f64,
}

impl DegradationModel {
    pub fn new(coefficient: f64) -> Self {
        DegradationModel { coefficient }
    }

    pub fn factor(&self, tyre_age: u32) -> f64 {
        1.0 + self.coefficient * f64::from(tyre_age)
    }
}

// One row of a simulation trace. Immutable once produced; the serde renames
// are the column contract reporting and plotting tools read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LapRecord {
    #[serde(rename = "Strategy")]
    pub strategy: String,
    #[serde(rename = "Lap")]
    pub lap: u32,
    #[serde(rename = "Stint")]
    pub stint: u32,
    #[serde(rename = "Compound")]
    pub compound: LapCompound,
    #[serde(rename = "TyreAge")]
    pub tyre_age: u32,
    #[serde(rename = "PredictedTime_sec")]
    pub predicted_time_sec: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    pub strategy: String,
    pub total_time_sec: f64,
    pub laps: Vec<LapRecord>,
}

#[derive(Debug)]
pub struct StrategyFailure {
    pub strategy: String,
    pub error: SimulationError,
}

// Outcome of ranking a catalog: successful results in catalog order, plus the
// strategies that failed and why. A failed strategy never aborts its siblings.
#[derive(Debug)]
pub struct ComparisonOutcome {
    pub results: Vec<SimulationResult>,
    pub failures: Vec<StrategyFailure>,
}

impl ComparisonOutcome {
    // Minimum total time wins; ties go to the strategy listed first.
    pub fn best(&self) -> Option<&SimulationResult> {
        self.results.iter().fold(None, |best, result| match best {
            Some(current) if result.total_time_sec < current.total_time_sec => Some(result),
            None => Some(result),
            _ => best,
        })
    }

    pub fn lap_records(&self) -> impl Iterator<Item = &LapRecord> {
        self.results.iter().flat_map(|result| result.laps.iter())
    }
}

pub struct StrategySimulator {
    degradation: DegradationModel,
    pit_stop_penalty: f64,
}

impl StrategySimulator {
    pub fn new(config: SimulationConfig) -> Self {
        StrategySimulator {
            degradation: DegradationModel::new(config.degradation_coefficient),
            pit_stop_penalty: config.pit_stop_penalty,
        }
    }

    // Advance one strategy lap by lap. The predictor is queried exactly once
    // per racing lap with the current tyre state; laps are never batched
    // because the feature row changes every lap.
    pub fn simulate(
        &self,
        strategy: &StrategyDefinition,
        predictor: &dyn LapTimePredictor,
        base_position: u32,
    ) -> Result<SimulationResult, SimulationError> {
        let configuration = |source| SimulationError::Configuration {
            strategy: strategy.name.clone(),
            source,
        };
        strategy.validate().map_err(configuration)?;
        if base_position == 0 {
            return Err(configuration(ConfigurationError::InvalidBasePosition(
                base_position,
            )));
        }

        let mut total_time = 0.0;
        let mut laps = Vec::with_capacity(strategy.race_laps() as usize + strategy.stints.len());
        let mut tyre_age: u32 = 0;
        let mut lap_number: u32 = 1;

        for (stint_index, stint) in strategy.stints.iter().enumerate() {
            for _ in 0..stint.laps {
                let features = LapFeatures {
                    stint: stint_index as u32,
                    tyre_age,
                    fresh_tyre: tyre_age == 0,
                    compound: stint.compound,
                    position: base_position,
                };
                let prediction = |source| SimulationError::Prediction {
                    strategy: strategy.name.clone(),
                    lap: lap_number,
                    stint: stint_index,
                    source,
                };
                let base_time = predictor.predict(&features).map_err(prediction)?;
                if !base_time.is_finite() {
                    return Err(prediction(PredictionError::NonFinite(base_time)));
                }

                let predicted = base_time * self.degradation.factor(tyre_age);
                total_time += predicted;
                laps.push(LapRecord {
                    strategy: strategy.name.clone(),
                    lap: lap_number,
                    stint: stint_index as u32,
                    compound: stint.compound.into(),
                    tyre_age,
                    predicted_time_sec: round_to(predicted, LAP_TIME_PRECISION),
                });
                tyre_age += 1;
                lap_number += 1;
            }

            // The stop is charged after every stint, the final one included.
            // It shifts all totals by the same amount, so rankings are
            // unaffected.
            total_time += self.pit_stop_penalty;
            laps.push(LapRecord {
                strategy: strategy.name.clone(),
                lap: lap_number,
                stint: stint_index as u32,
                compound: LapCompound::Pit,
                tyre_age: 0,
                predicted_time_sec: self.pit_stop_penalty,
            });
            lap_number += 1;
            tyre_age = 0;
        }

        Ok(SimulationResult {
            strategy: strategy.name.clone(),
            total_time_sec: round_to(total_time, TOTAL_TIME_PRECISION),
            laps,
        })
    }

    // Run every catalog entry independently and collect successes and
    // failures. Each run starts from fresh tyre/lap counters.
    pub fn compare(
        &self,
        catalog: &[StrategyDefinition],
        predictor: &dyn LapTimePredictor,
        base_position: u32,
    ) -> ComparisonOutcome {
        if catalog
            .windows(2)
            .any(|pair| pair[0].race_laps() != pair[1].race_laps())
        {
            warn!("strategies cover different race distances; totals are not directly comparable");
        }

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for strategy in catalog {
            match self.simulate(strategy, predictor, base_position) {
                Ok(result) => {
                    debug!(
                        strategy = %result.strategy,
                        total_sec = result.total_time_sec,
                        "simulated strategy"
                    );
                    results.push(result);
                }
                Err(error) => {
                    warn!(strategy = %strategy.name, %error, "strategy simulation failed");
                    failures.push(StrategyFailure {
                        strategy: strategy.name.clone(),
                        error,
                    });
                }
            }
        }
        ComparisonOutcome { results, failures }
    }
}

fn round_to(value: f64, places: u32) -> f64 {
    let scale = 10f64.powi(places as i32);
    (value * scale).round() / scale
}
