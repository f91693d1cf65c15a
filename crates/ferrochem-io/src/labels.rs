//! Tabular label files.
//!
//! Count datasets ship a tab-delimited table with one row per image and one column per human
//! annotator. The per-image label is the mean of the annotator columns, truncated toward zero.
use anyhow::{anyhow, bail, Context, Result};
use polars::prelude::*;
use std::path::Path;

/// Read a delimited text file with a header row.
pub fn read_delimited(path: &Path, separator: u8) -> Result<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_parse_options(CsvParseOptions::default().with_separator(separator))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .with_context(|| format!("Cannot open label file '{}'", path.display()))?
        .finish()
        .with_context(|| format!("Cannot parse label file '{}'", path.display()))
}

fn numeric_column(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = df
        .column(name)
        .map_err(|_| anyhow!("Label column '{}' not found", name))?;
    let values = column
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    values
        .f64()?
        .into_iter()
        .enumerate()
        .map(|(row, v)| v.ok_or_else(|| anyhow!("Non-numeric value in column '{}' row {}", name, row)))
        .collect()
}

/// Row-wise mean of `columns`, truncated toward zero.
pub fn average_columns(columns: &[Vec<f64>]) -> Result<Vec<i64>> {
    let Some(first) = columns.first() else {
        bail!("At least one label column is required");
    };
    let rows = first.len();
    if columns.iter().any(|c| c.len() != rows) {
        bail!("Label columns have different lengths");
    }
    let n = columns.len() as f64;
    Ok((0..rows)
        .map(|row| {
            let mean = columns.iter().map(|c| c[row]).sum::<f64>() / n;
            mean.trunc() as i64
        })
        .collect())
}

/// Parse a tab-delimited counts file and average the named annotator columns.
pub fn read_annotator_counts(path: &Path, columns: &[&str]) -> Result<Vec<i64>> {
    let df = read_delimited(path, b'\t')?;
    let values = columns
        .iter()
        .map(|name| numeric_column(&df, name))
        .collect::<Result<Vec<_>>>()?;
    let labels = average_columns(&values)?;
    tracing::debug!("Parsed {} labels from {}", labels.len(), path.display());
    Ok(labels)
}
