use std::error::Error;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::strategy::LapRecord;

// Serializes lap traces with the column set downstream reporting and plotting
// read: Strategy, Lap, Stint, Compound, TyreAge, PredictedTime_sec.
pub fn write_lap_records<'a, P, I>(path: P, records: I) -> Result<(), Box<dyn Error>>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = &'a LapRecord>,
{
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let writer = fs::File::create(path)?;
    write_records(writer, records)?;
    Ok(())
}

fn write_records<'a, W, I>(writer: W, records: I) -> Result<(), csv::Error>
where
    W: Write,
    I: IntoIterator<Item = &'a LapRecord>,
{
    let mut csv_writer = csv::Writer::from_writer(writer);
    for record in records {
        csv_writer.serialize(record)?;
    }
    csv_writer.flush()?;
    Ok(())
}
