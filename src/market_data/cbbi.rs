// =============================================================================
// CBBI — Colin Talks Crypto Bitcoin Bull Run Index
// =============================================================================
//
// The public `latest.json` is an object of named sections. Every section whose
// value is itself an object is a time series keyed by unix seconds (a few older
// sections use ISO dates):
//
//   { "Price": { "1700000000": 37000.1, ... }, "Confidence": { ... }, ... }
//
// Each such section becomes one column of a `SeriesTable`. Keys that are not a
// time are skipped; values that are not numbers become empty cells.
// =============================================================================

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{MarketDataError, MarketDataResult};
use crate::export::SeriesTable;
use crate::market_data::cache::{CacheKey, TtlCache};

pub const CBBI_JSON_URL: &str = "https://colintalkscrypto.com/cbbi/data/latest.json";

/// One dated reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Parsed CBBI payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CbbiReport {
    pub table: SeriesTable,
    pub confidence: Option<Reading>,
    pub price: Option<Reading>,
    /// Every top-level key of the payload, sorted.
    pub sections: Vec<String>,
}

/// JSON view served by the dashboard API.
#[derive(Debug, Clone, Serialize)]
pub struct CbbiSummary {
    pub confidence: Option<Reading>,
    pub price: Option<Reading>,
    pub sections: Vec<String>,
    pub series: Vec<String>,
    pub rows: usize,
}

impl CbbiReport {
    pub fn summary(&self) -> CbbiSummary {
        CbbiSummary {
            confidence: self.confidence,
            price: self.price,
            sections: self.sections.clone(),
            series: self.table.columns().to_vec(),
            rows: self.table.len(),
        }
    }
}

/// Fetches and caches the CBBI payload.
pub struct CbbiClient {
    url: String,
    ttl: Duration,
    client: reqwest::Client,
    cache: TtlCache<CbbiReport>,
}

impl CbbiClient {
    pub fn new(url: impl Into<String>, timeout: Duration, ttl: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("coin-pulse/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            url: url.into(),
            ttl,
            client,
            cache: TtlCache::new(),
        })
    }

    /// Latest report, served from cache within the TTL.
    pub async fn fetch(&self) -> MarketDataResult<CbbiReport> {
        let key = CacheKey::new("fetch_cbbi", self.url.clone());
        self.cache
            .get_or_fetch(key, self.ttl, || self.fetch_uncached())
            .await
    }

    #[instrument(skip(self), fields(url = %self.url), name = "cbbi::fetch")]
    async fn fetch_uncached(&self) -> MarketDataResult<CbbiReport> {
        let resp = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| MarketDataError::upstream("fetch_cbbi", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MarketDataError::upstream("fetch_cbbi", format!("HTTP {status}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| MarketDataError::upstream("fetch_cbbi", e))?;
        let report = parse_cbbi(&body).map_err(|e| MarketDataError::upstream("fetch_cbbi", e))?;

        debug!(series = report.table.columns().len(), rows = report.table.len(), "CBBI fetched");
        Ok(report)
    }
}

impl std::fmt::Debug for CbbiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CbbiClient")
            .field("url", &self.url)
            .field("ttl", &self.ttl)
            .finish()
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse the `latest.json` body. The top level must be an object.
pub fn parse_cbbi(body: &str) -> Result<CbbiReport, String> {
    let root: Value = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let Value::Object(sections) = root else {
        return Err("CBBI payload is not a JSON object".to_string());
    };

    let mut names: Vec<String> = sections.keys().cloned().collect();
    names.sort();

    let mut table = SeriesTable::new();
    for name in &names {
        let Some(Value::Object(entries)) = sections.get(name) else {
            continue;
        };
        let samples: Vec<(DateTime<Utc>, Option<f64>)> = entries
            .iter()
            .filter_map(|(key, value)| parse_time_key(key).map(|ts| (ts, numeric(value))))
            .collect();
        if !samples.is_empty() {
            table.add_column(name.clone(), samples);
        }
    }

    let reading = |column: &str| {
        table
            .latest(column)
            .map(|(timestamp, value)| Reading { timestamp, value })
    };
    let confidence = reading("Confidence");
    let price = reading("Price");

    Ok(CbbiReport {
        table,
        confidence,
        price,
        sections: names,
    })
}

/// Unix seconds, RFC 3339, `YYYY-MM-DD HH:MM:SS`, or a bare date.
fn parse_time_key(key: &str) -> Option<DateTime<Utc>> {
    let key = key.trim();
    if let Ok(secs) = key.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(key) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(key, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(key, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PAYLOAD: &str = r#"{
        "Price":      { "1700000000": 37000.5, "1700086400": 37500.0 },
        "Confidence": { "1700000000": 0.61, "1700086400": "0.63", "oops": 1.0 },
        "RUPL":       { "2023-11-14": 0.5, "1700086400": null },
        "Version":    "2.1"
    }"#;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn builds_one_column_per_object_section() {
        let report = parse_cbbi(PAYLOAD).unwrap();
        assert_eq!(report.table.columns(), ["Confidence", "Price", "RUPL"]);
        assert_eq!(report.sections, ["Confidence", "Price", "RUPL", "Version"]);
    }

    #[test]
    fn latest_readings_use_last_timestamp() {
        let report = parse_cbbi(PAYLOAD).unwrap();
        assert_eq!(
            report.confidence,
            Some(Reading { timestamp: ts(1_700_086_400), value: 0.63 })
        );
        assert_eq!(report.price.map(|r| r.value), Some(37500.0));
    }

    #[test]
    fn iso_keys_and_null_values() {
        let report = parse_cbbi(PAYLOAD).unwrap();
        let day = Utc.with_ymd_and_hms(2023, 11, 14, 0, 0, 0).unwrap();
        assert_eq!(report.table.get("RUPL", day), Some(0.5));
        assert_eq!(report.table.get("RUPL", ts(1_700_086_400)), None);
        // 2023-11-14T00:00, 1700000000 (22:13 same day), 1700086400
        assert_eq!(report.table.len(), 3);
    }

    #[test]
    fn non_object_payload_is_an_error() {
        assert!(parse_cbbi("[1, 2, 3]").is_err());
        assert!(parse_cbbi("<html>").is_err());
    }

    #[test]
    fn payload_without_series_has_no_readings() {
        let report = parse_cbbi(r#"{ "Version": "2.1" }"#).unwrap();
        assert!(report.table.is_empty());
        assert_eq!(report.confidence, None);
        assert_eq!(report.summary().rows, 0);
    }

    #[test]
    fn time_key_formats() {
        assert_eq!(parse_time_key("0"), Some(ts(0)));
        assert_eq!(parse_time_key("1970-01-01T00:01:00Z"), Some(ts(60)));
        assert_eq!(parse_time_key("1970-01-01 00:02:00"), Some(ts(120)));
        assert_eq!(parse_time_key("1970-01-02"), Some(ts(86_400)));
        assert_eq!(parse_time_key("latest"), None);
    }
}
