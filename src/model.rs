use std::collections::HashMap;

use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};
use thiserror::Error;
use tracing::info;

use crate::data::TrainingLap;
use crate::strategy::Compound;

pub type FittedLinearRegression = linfa_linear::FittedLinearRegression<f64>;

// Feature columns, in the order both fitting and inference build their rows.
// This ordering is the contract between the two sides; change it in one place
// and refit.
pub const FEATURE_NAMES: [&str; 5] = [
    "Stint",
    "TyreAge",
    "IsFreshTyre",
    "CompoundEncoded",
    "Position",
];

const MIN_FIT_ROWS: usize = 10;

// Single-row input to a lap-time predictor. Position is the race position the
// whole simulation is run at; it never changes lap to lap.
#[derive(Debug, Clone, PartialEq)]
pub struct LapFeatures {
    pub stint: u32,
    pub tyre_age: u32,
    pub fresh_tyre: bool,
    pub compound: Compound,
    pub position: u32,
}

impl LapFeatures {
    pub fn to_row(&self) -> [f64; FEATURE_NAMES.len()] {
        [
            f64::from(self.stint),
            f64::from(self.tyre_age),
            f64::from(u8::from(self.fresh_tyre)),
            f64::from(self.compound.code()),
            f64::from(self.position),
        ]
    }
}

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("model produced a non-finite lap time ({0})")]
    NonFinite(f64),
    #[error("model inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("not enough clean laps to fit a model ({0} rows)")]
    NotEnoughData(usize),
    #[error("linear regression failed: {0}")]
    Fit(String),
    #[error(transparent)]
    Prediction(#[from] PredictionError),
}

/// One-row lap-time inference, in seconds. Any model family that can score a
/// single feature row can stand in here; the simulator never looks inside.
pub trait LapTimePredictor {
    fn predict(&self, features: &LapFeatures) -> Result<f64, PredictionError>;

    /// Short family name for logs and report headers.
    fn name(&self) -> &str;
}

fn features_for(lap: &TrainingLap) -> LapFeatures {
    LapFeatures {
        stint: lap.stint,
        tyre_age: lap.tyre_age,
        fresh_tyre: lap.fresh_tyre,
        compound: lap.compound,
        position: lap.position,
    }
}

// Ordinary least squares over the five feature columns, the workhorse model.
pub struct LinearLapModel {
    inner: FittedLinearRegression,
}

impl LinearLapModel {
    pub fn fit(laps: &[TrainingLap]) -> Result<Self, ModelError> {
        if laps.len() < MIN_FIT_ROWS {
            return Err(ModelError::NotEnoughData(laps.len()));
        }

        let rows: Vec<f64> = laps
            .iter()
            .flat_map(|lap| features_for(lap).to_row())
            .collect();
        let targets: Vec<f64> = laps.iter().map(|lap| lap.lap_time_seconds).collect();

        let x = Array2::from_shape_vec((laps.len(), FEATURE_NAMES.len()), rows)
            .map_err(|e| ModelError::Fit(e.to_string()))?;
        let y = Array1::from_vec(targets);
        let dataset = Dataset::new(x, y);

        let inner = LinearRegression::new()
            .fit(&dataset)
            .map_err(|e| ModelError::Fit(e.to_string()))?;
        info!(rows = laps.len(), "fitted linear lap-time model");
        Ok(LinearLapModel { inner })
    }
}

impl LapTimePredictor for LinearLapModel {
    fn predict(&self, features: &LapFeatures) -> Result<f64, PredictionError> {
        let row = Array2::from_shape_vec((1, FEATURE_NAMES.len()), features.to_row().to_vec())
            .map_err(|e| PredictionError::Inference(e.to_string()))?;
        Ok(self.inner.predict(&row)[0])
    }

    fn name(&self) -> &str {
        "linear"
    }
}

// Per-compound mean pace with an overall-mean fallback. Deliberately crude;
// useful as a sanity baseline against the fitted regressor.
pub struct CompoundMeanModel {
    means: HashMap<Compound, f64>,
    overall: f64,
}

impl CompoundMeanModel {
    pub fn fit(laps: &[TrainingLap]) -> Result<Self, ModelError> {
        if laps.is_empty() {
            return Err(ModelError::NotEnoughData(0));
        }

        let mut sums: HashMap<Compound, (f64, u32)> = HashMap::new();
        let mut total = 0.0;
        for lap in laps {
            let entry = sums.entry(lap.compound).or_insert((0.0, 0));
            entry.0 += lap.lap_time_seconds;
            entry.1 += 1;
            total += lap.lap_time_seconds;
        }

        let overall = total / laps.len() as f64;
        let means = sums
            .into_iter()
            .map(|(compound, (sum, count))| (compound, sum / f64::from(count)))
            .collect();
        Ok(CompoundMeanModel { means, overall })
    }
}

impl LapTimePredictor for CompoundMeanModel {
    fn predict(&self, features: &LapFeatures) -> Result<f64, PredictionError> {
        Ok(self
            .means
            .get(&features.compound)
            .copied()
            .unwrap_or(self.overall))
    }

    fn name(&self) -> &str {
        "mean"
    }
}

// Mean absolute error of a predictor against observed lap times.
pub fn mean_absolute_error(
    predictor: &dyn LapTimePredictor,
    laps: &[TrainingLap],
) -> Result<f64, ModelError> {
    if laps.is_empty() {
        return Err(ModelError::NotEnoughData(0));
    }

    let mut total = 0.0;
    for lap in laps {
        let predicted = predictor.predict(&features_for(lap))?;
        total += (predicted - lap.lap_time_seconds).abs();
    }
    Ok(total / laps.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lap(stint: u32, age: u32, compound: Compound, position: u32, time: f64) -> TrainingLap {
        TrainingLap {
            driver: "VER".to_string(),
            lap_number: age + 1,
            stint,
            compound,
            tyre_age: age,
            fresh_tyre: age == 0,
            position,
            lap_time_seconds: time,
        }
    }

    #[test]
    fn compound_codes_match_the_training_encoding() {
        assert_eq!(Compound::Soft.code(), 0);
        assert_eq!(Compound::Medium.code(), 1);
        assert_eq!(Compound::Hard.code(), 2);
    }

    #[test]
    fn feature_rows_follow_the_declared_column_order() {
        let features = LapFeatures {
            stint: 2,
            tyre_age: 7,
            fresh_tyre: false,
            compound: Compound::Hard,
            position: 4,
        };
        assert_eq!(features.to_row(), [2.0, 7.0, 0.0, 2.0, 4.0]);
    }

    #[test]
    fn mean_model_predicts_per_compound_averages() {
        let laps = vec![
            lap(0, 0, Compound::Soft, 1, 90.0),
            lap(0, 1, Compound::Soft, 1, 92.0),
            lap(1, 0, Compound::Hard, 1, 94.0),
        ];
        let model = CompoundMeanModel::fit(&laps).unwrap();

        let soft = LapFeatures {
            stint: 0,
            tyre_age: 0,
            fresh_tyre: true,
            compound: Compound::Soft,
            position: 1,
        };
        let hard = LapFeatures {
            compound: Compound::Hard,
            ..soft.clone()
        };
        let medium = LapFeatures {
            compound: Compound::Medium,
            ..soft.clone()
        };

        assert!((model.predict(&soft).unwrap() - 91.0).abs() < 1e-9);
        assert!((model.predict(&hard).unwrap() - 94.0).abs() < 1e-9);
        // Unseen compound falls back to the overall mean.
        assert!((model.predict(&medium).unwrap() - 92.0).abs() < 1e-9);
    }

    #[test]
    fn linear_model_recovers_a_linear_pace_curve() {
        // Lap time generated as an exact linear function of the feature row.
        let pace = |stint: u32, age: u32, compound: Compound, position: u32| {
            90.0 + 0.5 * f64::from(age)
                + 1.5 * f64::from(stint)
                + 0.8 * f64::from(compound.code())
                - 0.2 * f64::from(position)
                + 0.3 * f64::from(u8::from(age == 0))
        };

        let mut laps = Vec::new();
        for (stint, compound) in [(0, Compound::Soft), (1, Compound::Medium), (2, Compound::Hard)]
        {
            for age in 0..10 {
                let position = 1 + (age % 5);
                laps.push(lap(
                    stint,
                    age,
                    compound,
                    position,
                    pace(stint, age, compound, position),
                ));
            }
        }

        let model = LinearLapModel::fit(&laps).unwrap();
        let probe = LapFeatures {
            stint: 1,
            tyre_age: 6,
            fresh_tyre: false,
            compound: Compound::Medium,
            position: 3,
        };
        let predicted = model.predict(&probe).unwrap();
        let expected = pace(1, 6, Compound::Medium, 3);
        assert!(
            (predicted - expected).abs() < 1e-6,
            "predicted {predicted}, expected {expected}"
        );
    }

    #[test]
    fn fit_rejects_tiny_datasets() {
        let laps = vec![lap(0, 0, Compound::Soft, 1, 90.0)];
        assert!(matches!(
            LinearLapModel::fit(&laps),
            Err(ModelError::NotEnoughData(1))
        ));
    }

    #[test]
    fn evaluation_needs_at_least_one_lap() {
        let model = CompoundMeanModel::fit(&[lap(0, 0, Compound::Soft, 1, 90.0)]).unwrap();
        assert!(matches!(
            mean_absolute_error(&model, &[]),
            Err(ModelError::NotEnoughData(0))
        ));
    }
}
