//! CSV adapters at the edges of the pipeline.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::thread;

use crate::error::ReconError;
use crate::model::{OutputRow, RawRecord, ReconTransaction};
use crate::pipeline::CHANNEL_CAPACITY;

/// Header of the mismatch report.
pub const OUTPUT_HEADER: [&str; 6] = ["source", "id", "type", "amount", "date", "remark"];

/// Stream the rows of a CSV file as header-keyed records.
pub fn read_csv(path: impl AsRef<Path>) -> Result<Receiver<RawRecord>, ReconError> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| ReconError::Io(format!("cannot open {}: {e}", path.display())))?;
    read_csv_from(file)
}

/// Like [`read_csv`] over any reader. The header row is read up front; data
/// rows are decoded on a background thread.
///
/// A row whose field count differs from the header (or any read error) is
/// logged and ends the stream.
pub fn read_csv_from<R: Read + Send + 'static>(
    reader: R,
) -> Result<Receiver<RawRecord>, ReconError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ReconError::Io(e.to_string()))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let (tx, rx) = mpsc::sync_channel(CHANNEL_CAPACITY);
    thread::spawn(move || {
        for (line, result) in reader.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("csv: stopping at data row {}: {e}", line + 1);
                    return;
                }
            };
            let row: RawRecord = headers
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_string))
                .collect();
            if tx.send(row).is_err() {
                return;
            }
        }
    });
    Ok(rx)
}

/// Write results as the mismatch report. Returns the number of data rows.
pub fn write_csv<I>(path: impl AsRef<Path>, rows: I) -> Result<usize, ReconError>
where
    I: IntoIterator<Item = ReconTransaction>,
{
    let path = path.as_ref();
    let file = File::create(path)
        .map_err(|e| ReconError::Io(format!("cannot create {}: {e}", path.display())))?;
    write_csv_to(file, rows)
}

pub fn write_csv_to<W, I>(writer: W, rows: I) -> Result<usize, ReconError>
where
    W: Write,
    I: IntoIterator<Item = ReconTransaction>,
{
    let csv_err = |e: csv::Error| ReconError::Io(e.to_string());

    // Header is written by hand so an empty report still carries it.
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    wtr.write_record(OUTPUT_HEADER).map_err(csv_err)?;

    let mut count = 0;
    for rt in rows {
        wtr.serialize(OutputRow::from(&rt)).map_err(csv_err)?;
        count += 1;
    }
    wtr.flush()?;
    Ok(count)
}
