use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::ServiceOptions;

/// Rows resolved per batch call; coordinates are grouped by tile within a chunk.
const CHUNK_SIZE: usize = 1000;

pub fn run(
    options: &ServiceOptions,
    input: PathBuf,
    output: Option<PathBuf>,
    lat_col: String,
    lng_col: String,
    zoom: u8,
) -> Result<()> {
    let extension = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if extension != "csv" {
        bail!("Unsupported file format: {}. Use .csv", extension);
    }

    let service = options.build()?;

    let file = File::open(&input).context("Failed to open input file")?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));

    // Find column indices
    let headers = reader.headers()?.clone();
    let lat_idx = headers
        .iter()
        .position(|h| h == lat_col)
        .with_context(|| format!("Column '{}' not found in CSV", lat_col))?;
    let lng_idx = headers
        .iter()
        .position(|h| h == lng_col)
        .with_context(|| format!("Column '{}' not found in CSV", lng_col))?;

    // Collect records for progress bar
    let records: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;

    let pb = ProgressBar::new(records.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let output_path = output.unwrap_or_else(|| default_output(&input));
    let output_file = File::create(&output_path).context("Failed to create output file")?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(output_file));

    let mut new_headers: Vec<&str> = headers.iter().collect();
    new_headers.push("elevation");
    writer.write_record(&new_headers)?;

    let mut failures = 0usize;
    for (chunk_index, chunk) in records.chunks(CHUNK_SIZE).enumerate() {
        // Rows whose coordinates don't parse are reported but not queried.
        let parsed: Vec<Option<(f64, f64)>> = chunk
            .iter()
            .map(|record| {
                let lat = record.get(lat_idx)?.trim().parse().ok()?;
                let lng = record.get(lng_idx)?.trim().parse().ok()?;
                Some((lat, lng))
            })
            .collect();
        let coords: Vec<(f64, f64)> = parsed.iter().flatten().copied().collect();
        let mut elevations = service.get_elevations_batch(&coords, zoom).into_iter();

        for (offset, (record, coord)) in chunk.iter().zip(&parsed).enumerate() {
            let row = chunk_index * CHUNK_SIZE + offset + 2;
            let elevation = match coord.and_then(|_| elevations.next()) {
                Some(Ok(elevation)) => format!("{:.2}", elevation),
                Some(Err(e)) => {
                    tracing::warn!(row, error = %e, "Elevation lookup failed");
                    failures += 1;
                    "error".to_string()
                }
                None => {
                    tracing::warn!(row, "Invalid coordinate");
                    failures += 1;
                    "error".to_string()
                }
            };

            let mut new_record: Vec<&str> = record.iter().collect();
            new_record.push(&elevation);
            writer.write_record(&new_record)?;
            pb.inc(1);
        }
    }

    pb.finish_with_message("done");
    writer.flush()?;

    println!("Output written to: {}", output_path.display());
    if failures > 0 {
        println!("{} of {} rows failed", failures, records.len());
    }
    Ok(())
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{}_elevation.csv", stem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output() {
        assert_eq!(
            default_output(Path::new("/data/points.csv")),
            PathBuf::from("/data/points_elevation.csv")
        );
    }
}
