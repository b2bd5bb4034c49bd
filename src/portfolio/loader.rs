//! # Price Loader
//!
//! Reads local CSV price files into a [`PriceHistory`].
//!
//! Two layouts are understood:
//! - wide: `date,AAA,BBB,...` with one column per ticker and blank cells for
//!   missing observations;
//! - long: `date,ticker,price`, one observation per row.
//!
//! Dates use ISO `YYYY-MM-DD`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use chrono::NaiveDate;
use csv::ReaderBuilder;
use csv::Trim;
use serde::Deserialize;
use tracing::debug;

use super::data::PriceHistory;
use super::data::PriceObservation;

/// Column layout of a price file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CsvLayout {
  #[default]
  Wide,
  Long,
}

#[derive(Debug, Deserialize)]
struct LongRow {
  date: NaiveDate,
  ticker: String,
  price: f64,
}

/// Load a price file from disk.
pub fn load_prices<P: AsRef<Path>>(path: P, layout: CsvLayout) -> Result<PriceHistory> {
  let file = File::open(&path).with_context(|| format!("Failed to open file: {:?}", path.as_ref()))?;
  let history =
    read_prices(file, layout).with_context(|| format!("Failed to parse prices from {:?}", path.as_ref()))?;
  debug!(path = ?path.as_ref(), tickers = history.len(), "loaded price file");
  Ok(history)
}

/// Parse prices from any reader.
pub fn read_prices<R: Read>(reader: R, layout: CsvLayout) -> Result<PriceHistory> {
  let reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
  match layout {
    CsvLayout::Wide => read_wide(reader),
    CsvLayout::Long => read_long(reader),
  }
}

fn read_wide<R: Read>(mut reader: csv::Reader<R>) -> Result<PriceHistory> {
  let headers = reader.headers().context("Failed to read header row")?.clone();
  if headers.len() < 2 {
    bail!("wide layout needs a date column followed by at least one ticker column");
  }
  let tickers: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
  let mut columns: Vec<Vec<PriceObservation>> = vec![Vec::new(); tickers.len()];

  for (row, record) in reader.records().enumerate() {
    let line = row + 2;
    let record = record.with_context(|| format!("Malformed CSV record on line {line}"))?;
    let raw_date = record.get(0).unwrap_or_default();
    let date = parse_date(raw_date).with_context(|| format!("Bad date on line {line}"))?;

    for (i, cell) in record.iter().skip(1).enumerate() {
      if cell.is_empty() {
        continue;
      }
      let Some(column) = columns.get_mut(i) else {
        bail!("line {line} has more cells than the header");
      };
      let price: f64 = cell
        .parse()
        .with_context(|| format!("Bad price {cell:?} for {} on line {line}", tickers[i]))?;
      column.push(PriceObservation::new(date, price));
    }
  }

  let mut history = PriceHistory::new();
  for (ticker, observations) in tickers.into_iter().zip(columns) {
    history.insert(ticker, observations)?;
  }
  Ok(history)
}

fn read_long<R: Read>(mut reader: csv::Reader<R>) -> Result<PriceHistory> {
  let mut order: Vec<String> = Vec::new();
  let mut grouped: BTreeMap<String, Vec<PriceObservation>> = BTreeMap::new();

  for (row, result) in reader.deserialize::<LongRow>().enumerate() {
    let line = row + 2;
    let record = result.with_context(|| format!("Failed to parse price row on line {line}"))?;
    if record.ticker.is_empty() {
      bail!("blank ticker on line {line}");
    }
    let observations = grouped.entry(record.ticker.clone()).or_insert_with(|| {
      order.push(record.ticker.clone());
      Vec::new()
    });
    observations.push(PriceObservation::new(record.date, record.price));
  }

  let mut history = PriceHistory::new();
  for ticker in order {
    let observations = grouped.remove(&ticker).unwrap_or_default();
    history.insert(ticker, observations)?;
  }
  Ok(history)
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("expected YYYY-MM-DD, got {raw:?}"))
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use tempfile::tempdir;

  use super::*;

  #[test]
  fn wide_file_with_gaps() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("prices.csv");
    let mut file = File::create(&path).unwrap();
    writeln!(file, "date,AAA,BBB").unwrap();
    writeln!(file, "2024-01-02,100.0,50.0").unwrap();
    writeln!(file, "2024-01-03,101.5,").unwrap();
    writeln!(file, "2024-01-04, 102.0 ,51.0").unwrap();
    drop(file);

    let history = load_prices(&path, CsvLayout::Wide).unwrap();
    assert_eq!(history.universe().unwrap().tickers(), &["AAA", "BBB"]);
    assert_eq!(history.observations("AAA").unwrap().len(), 3);
    let bbb = history.observations("BBB").unwrap();
    assert_eq!(bbb.len(), 2);
    assert_eq!(bbb[1].price, 51.0);
  }

  #[test]
  fn long_file_keeps_first_seen_order() {
    let csv = "date,ticker,price\n\
               2024-01-02,ZZZ,10\n\
               2024-01-02,AAA,20\n\
               2024-01-03,ZZZ,11\n";
    let history = read_prices(csv.as_bytes(), CsvLayout::Long).unwrap();
    assert_eq!(history.universe().unwrap().tickers(), &["ZZZ", "AAA"]);
    assert_eq!(history.observations("ZZZ").unwrap().len(), 2);
  }

  #[test]
  fn bad_cells_report_their_line() {
    let csv = "date,AAA\n2024-01-02,100\n2024-01-03,abc\n";
    let err = read_prices(csv.as_bytes(), CsvLayout::Wide).unwrap_err();
    assert!(format!("{err:#}").contains("line 3"));

    let csv = "date,AAA\n02/01/2024,100\n";
    assert!(read_prices(csv.as_bytes(), CsvLayout::Wide).is_err());
  }

  #[test]
  fn duplicate_columns_are_rejected() {
    let csv = "date,AAA,AAA\n2024-01-02,1,2\n";
    assert!(read_prices(csv.as_bytes(), CsvLayout::Wide).is_err());
  }

  #[test]
  fn missing_file_has_context() {
    let dir = tempdir().unwrap();
    let err = load_prices(dir.path().join("nope.csv"), CsvLayout::Long).unwrap_err();
    assert!(err.to_string().contains("Failed to open file"));
  }
}
