use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use csv::ReaderBuilder;
use serde::Deserialize;
use tracing::{debug, info};

use crate::strategy::Compound;

// Plausible dry-race lap window for the circuit. Anything outside is a safety
// car period, an in/out lap that slipped through, or a timing glitch.
const LAP_TIME_MIN: f64 = 80.0;
const LAP_TIME_MAX: f64 = 105.0;

// Raw CSV row as exported from the timing archive. Numeric columns arrive as
// floats, pit timestamps as strings that are empty on normal racing laps.
#[derive(Debug, Deserialize)]
struct RawLap {
    #[serde(rename = "Driver")]
    driver: String,
    #[serde(rename = "LapNumber")]
    lap_number: f64,
    #[serde(rename = "Stint")]
    stint: f64,
    #[serde(rename = "Compound")]
    compound: String,
    #[serde(rename = "TyreLife")]
    tyre_life: f64,
    #[serde(rename = "FreshTyre")]
    fresh_tyre: Option<String>,
    #[serde(rename = "Position")]
    position: f64,
    #[serde(rename = "LapTimeSeconds")]
    lap_time_seconds: Option<f64>,
    #[serde(rename = "PitInTime")]
    pit_in_time: Option<String>,
    #[serde(rename = "PitOutTime")]
    pit_out_time: Option<String>,
}

// One cleaned historical lap, ready to become a training row.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingLap {
    pub driver: String,
    pub lap_number: u32,
    pub stint: u32,
    pub compound: Compound,
    pub tyre_age: u32,
    pub fresh_tyre: bool,
    pub position: u32,
    pub lap_time_seconds: f64,
}

pub struct LapDataset {
    pub laps: Vec<TrainingLap>,
}

impl LapDataset {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, csv::Error> {
        let reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
        Self::from_csv(reader)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        Self::from_csv(ReaderBuilder::new().has_headers(true).from_reader(reader))
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> Result<Self, csv::Error> {
        let mut laps = Vec::new();
        let mut skipped = 0usize;
        for row in reader.deserialize() {
            let raw: RawLap = row?;
            match clean(raw) {
                Some(lap) => laps.push(lap),
                None => skipped += 1,
            }
        }

        let drivers: HashSet<&str> = laps.iter().map(|lap| lap.driver.as_str()).collect();
        info!(
            kept = laps.len(),
            skipped,
            drivers = drivers.len(),
            "loaded lap dataset"
        );
        Ok(LapDataset { laps })
    }

    // Deterministic head/tail split so repeated runs evaluate on the same
    // hold-out laps.
    pub fn split(&self, train_ratio: f64) -> (&[TrainingLap], &[TrainingLap]) {
        let cut = ((self.laps.len() as f64) * train_ratio).round() as usize;
        self.laps.split_at(cut.min(self.laps.len()))
    }
}

fn clean(raw: RawLap) -> Option<TrainingLap> {
    // In-laps and out-laps carry pit box time, not representative pace.
    if raw.pit_in_time.is_some() || raw.pit_out_time.is_some() {
        return None;
    }
    let lap_time = raw.lap_time_seconds?;
    if !(LAP_TIME_MIN..=LAP_TIME_MAX).contains(&lap_time) {
        return None;
    }
    // NaN fails every one of these comparisons, so glitched rows drop out here.
    if raw.driver.is_empty()
        || !(raw.lap_number >= 1.0)
        || !(raw.stint >= 0.0)
        || !(raw.tyre_life >= 0.0)
        || !(raw.position >= 1.0)
    {
        return None;
    }
    let compound = match raw.compound.parse::<Compound>() {
        Ok(compound) => compound,
        Err(_) => {
            debug!(compound = %raw.compound, "skipping lap on non-dry compound");
            return None;
        }
    };

    Some(TrainingLap {
        driver: raw.driver,
        lap_number: raw.lap_number.round() as u32,
        stint: raw.stint.round() as u32,
        compound,
        tyre_age: raw.tyre_life.round() as u32,
        fresh_tyre: raw.fresh_tyre.as_deref().map_or(false, is_truthy),
        position: raw.position.round() as u32,
        lap_time_seconds: lap_time,
    })
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str =
        "Driver,LapNumber,Stint,Compound,TyreLife,FreshTyre,Position,LapTimeSeconds,PitInTime,PitOutTime";

    fn load(rows: &[&str]) -> LapDataset {
        let mut text = String::from(HEADER);
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        LapDataset::from_reader(Cursor::new(text)).unwrap()
    }

    #[test]
    fn keeps_clean_racing_laps() {
        let dataset = load(&["VER,1,0,SOFT,0,True,1,92.5,,"]);
        assert_eq!(dataset.laps.len(), 1);

        let lap = &dataset.laps[0];
        assert_eq!(lap.driver, "VER");
        assert_eq!(lap.compound, Compound::Soft);
        assert_eq!(lap.tyre_age, 0);
        assert!(lap.fresh_tyre);
        assert_eq!(lap.position, 1);
        assert!((lap.lap_time_seconds - 92.5).abs() < 1e-9);
    }

    #[test]
    fn drops_pit_outlier_and_wet_laps() {
        let dataset = load(&[
            "VER,1,0,SOFT,0,True,1,92.5,,0 days 00:00:21.500000",
            "VER,2,0,SOFT,1,False,1,130.0,,",
            "VER,3,0,SOFT,2,False,1,79.0,,",
            "VER,4,0,SOFT,3,False,1,,,",
            "VER,5,0,SOFT,4,False,1,93.1,0 days 00:01:02.000000,",
            "VER,6,1,INTERMEDIATE,0,True,1,95.0,,",
            "VER,7,1,HARD,1,False,1,95.0,,",
        ]);

        assert_eq!(dataset.laps.len(), 1);
        assert_eq!(dataset.laps[0].lap_number, 7);
        assert_eq!(dataset.laps[0].compound, Compound::Hard);
    }

    #[test]
    fn fresh_tyre_column_tolerates_missing_values() {
        let dataset = load(&[
            "LEC,1,0,MEDIUM,0,,2,93.0,,",
            "LEC,2,0,MEDIUM,1,false,2,93.2,,",
            "LEC,3,0,MEDIUM,2,1,2,93.4,,",
        ]);

        let fresh: Vec<bool> = dataset.laps.iter().map(|lap| lap.fresh_tyre).collect();
        assert_eq!(fresh, vec![false, false, true]);
    }

    #[test]
    fn split_is_deterministic_and_ordered() {
        let rows: Vec<String> = (1..=10)
            .map(|lap| format!("VER,{lap},0,SOFT,{},False,1,92.0,,", lap - 1))
            .collect();
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let dataset = load(&refs);

        let (train, holdout) = dataset.split(0.8);
        assert_eq!(train.len(), 8);
        assert_eq!(holdout.len(), 2);
        assert_eq!(holdout[0].lap_number, 9);

        let (train_again, _) = dataset.split(0.8);
        assert_eq!(train, train_again);
    }
}
