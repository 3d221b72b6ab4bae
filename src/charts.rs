// =============================================================================
// Chart Bundles — per-asset series for the presentation layer
// =============================================================================
//
// Three panels per asset, each a set of timestamp-aligned lines:
//
//   price  — price, fast/slow EMA, Bollinger middle/upper/lower
//   rsi    — RSI with reference lines at 30 and 70
//   macd   — MACD, signal and histogram with a zero line
//
// Unavailable points serialise as `null` so a chart library draws gaps.
// =============================================================================

use serde::Serialize;

use crate::assembler::{AssetAnalysis, RSI_OVERBOUGHT, RSI_OVERSOLD};
use crate::types::{IndicatorPoint, IndicatorSeries, IndicatorValue};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceLine {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPanel {
    pub title: String,
    pub lines: Vec<IndicatorSeries>,
    pub reference_lines: Vec<ReferenceLine>,
}

#[cfg(test)]
impl ChartPanel {
    pub fn line(&self, name: &str) -> Option<&IndicatorSeries> {
        self.lines.iter().find(|l| l.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartBundle {
    pub asset_id: String,
    pub points: usize,
    pub price: ChartPanel,
    pub rsi: ChartPanel,
    pub macd: ChartPanel,
}

pub fn build_chart_bundle(analysis: &AssetAnalysis) -> ChartBundle {
    let ind = &analysis.indicators;

    let price_line = IndicatorSeries {
        name: "price".to_string(),
        points: analysis
            .series
            .points()
            .iter()
            .map(|p| IndicatorPoint {
                timestamp: p.timestamp,
                value: IndicatorValue::from_f64(p.price),
            })
            .collect(),
    };

    ChartBundle {
        asset_id: analysis.asset_id.clone(),
        points: analysis.series.len(),
        price: ChartPanel {
            title: format!("{} price", analysis.asset_id),
            lines: vec![
                price_line,
                ind.ema_fast.clone(),
                ind.ema_slow.clone(),
                ind.bollinger.middle.clone(),
                ind.bollinger.upper.clone(),
                ind.bollinger.lower.clone(),
            ],
            reference_lines: Vec::new(),
        },
        rsi: ChartPanel {
            title: "RSI".to_string(),
            lines: vec![ind.rsi.clone()],
            reference_lines: vec![
                ReferenceLine {
                    label: "oversold".to_string(),
                    value: RSI_OVERSOLD,
                },
                ReferenceLine {
                    label: "overbought".to_string(),
                    value: RSI_OVERBOUGHT,
                },
            ],
        },
        macd: ChartPanel {
            title: "MACD".to_string(),
            lines: vec![
                ind.macd.macd.clone(),
                ind.macd.signal.clone(),
                ind.macd.histogram.clone(),
            ],
            reference_lines: vec![ReferenceLine {
                label: "zero".to_string(),
                value: 0.0,
            }],
        },
    }
}
