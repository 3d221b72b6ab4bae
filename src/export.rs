// =============================================================================
// Series Table — timestamp-indexed outer join of named series, CSV export
// =============================================================================
//
// Each column is a named series of `(timestamp, value)` samples. Rows are the
// union of every column's timestamps in ascending order; a column with no
// sample at a row's timestamp leaves that cell empty.
//
// CSV layout: `datetime,<column>,...` with RFC 3339 UTC timestamps. Files are
// written atomically (tmp sibling + rename) like the config file.
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;

use crate::indicators::IndicatorSet;
use crate::types::{IndicatorSeries, PriceSeries};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesTable {
    columns: Vec<String>,
    rows: BTreeMap<DateTime<Utc>, Vec<Option<f64>>>,
}

impl SeriesTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Price column plus every indicator series for one asset.
    pub fn from_indicators(series: &PriceSeries, indicators: &IndicatorSet) -> Self {
        let mut table = Self::new();
        table.add_column(
            "price",
            series.points().iter().map(|p| (p.timestamp, Some(p.price))),
        );
        for s in [
            &indicators.ema_fast,
            &indicators.ema_slow,
            &indicators.rsi,
            &indicators.macd.macd,
            &indicators.macd.signal,
            &indicators.macd.histogram,
            &indicators.bollinger.middle,
            &indicators.bollinger.upper,
            &indicators.bollinger.lower,
            &indicators.bollinger.std_dev,
        ] {
            table.add_indicator(s);
        }
        table
    }

    pub fn add_indicator(&mut self, series: &IndicatorSeries) {
        self.add_column(
            series.name.clone(),
            series.points.iter().map(|p| (p.timestamp, p.value.value())),
        );
    }

    /// Append a column. Non-finite values are stored as empty cells; for a
    /// timestamp repeated within the column the last sample wins.
    pub fn add_column<I>(&mut self, name: impl Into<String>, samples: I)
    where
        I: IntoIterator<Item = (DateTime<Utc>, Option<f64>)>,
    {
        let col = self.columns.len();
        self.columns.push(name.into());
        for row in self.rows.values_mut() {
            row.push(None);
        }

        let width = self.columns.len();
        for (timestamp, value) in samples {
            let row = self
                .rows
                .entry(timestamp)
                .or_insert_with(|| vec![None; width]);
            row[col] = value.filter(|v| v.is_finite());
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell value, `None` for an empty cell or unknown column/timestamp.
    pub fn get(&self, column: &str, timestamp: DateTime<Utc>) -> Option<f64> {
        let col = self.column_index(column)?;
        self.rows.get(&timestamp).and_then(|row| row[col])
    }

    /// Most recent non-empty reading of `column`.
    pub fn latest(&self, column: &str) -> Option<(DateTime<Utc>, f64)> {
        let col = self.column_index(column)?;
        self.rows
            .iter()
            .rev()
            .find_map(|(ts, row)| row[col].map(|v| (*ts, v)))
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    // -------------------------------------------------------------------------
    // CSV
    // -------------------------------------------------------------------------

    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push("datetime");
        header.extend(self.columns.iter().map(String::as_str));
        writer.write_record(&header).context("failed to write CSV header")?;

        for (timestamp, row) in &self.rows {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(timestamp.to_rfc3339_opts(SecondsFormat::Secs, true));
            record.extend(row.iter().map(|cell| cell.map(|v| v.to_string()).unwrap_or_default()));
            writer.write_record(&record).context("failed to write CSV row")?;
        }

        let bytes = writer.into_inner().context("failed to flush CSV writer")?;
        String::from_utf8(bytes).context("CSV output is not UTF-8")
    }

    /// Write the CSV to `path` atomically (write `.tmp`, then rename).
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = self.to_csv()?;

        let tmp_path = path.with_extension("csv.tmp");
        std::fs::write(&tmp_path, content)
            .with_context(|| format!("failed to write tmp CSV to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp CSV to {}", path.display()))?;

        info!(path = %path.display(), rows = self.len(), "CSV written");
        Ok(())
    }
}
