use crate::domain::quote::{
    DailySeriesPayload, QuoteRow, FIELD_CLOSE, FIELD_HIGH, FIELD_LOW, FIELD_OPEN, FIELD_VOLUME,
};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

const DATE_FORMAT: &str = "%Y-%m-%d";

// NUMERIC(18,6): 12 integer digits.
const PRICE_SCALE: u32 = 6;
const PRICE_LIMIT: i64 = 1_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub date_key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedSeries {
    /// One row per date, ascending.
    pub rows: Vec<QuoteRow>,
    pub skipped: Vec<SkippedEntry>,
}

pub fn normalize_series(symbol: &str, payload: Option<&DailySeriesPayload>) -> NormalizedSeries {
    let symbol = symbol.trim().to_ascii_uppercase();
    let Some(series) = payload
        .and_then(|p| p.series.as_ref())
        .and_then(Value::as_object)
    else {
        return NormalizedSeries::default();
    };

    let mut by_date: BTreeMap<NaiveDate, QuoteRow> = BTreeMap::new();
    let mut skipped = Vec::new();

    for (date_key, entry) in series {
        match parse_entry(&symbol, date_key, entry) {
            Ok(row) => {
                if by_date.insert(row.record_date, row).is_some() {
                    tracing::warn!(%symbol, %date_key, "duplicate date in series; keeping the later entry");
                }
            }
            Err(reason) => {
                tracing::warn!(%symbol, %date_key, %reason, "skipping series entry");
                skipped.push(SkippedEntry {
                    date_key: date_key.clone(),
                    reason,
                });
            }
        }
    }

    NormalizedSeries {
        rows: by_date.into_values().collect(),
        skipped,
    }
}

fn parse_entry(symbol: &str, date_key: &str, entry: &Value) -> Result<QuoteRow, String> {
    let record_date = NaiveDate::parse_from_str(date_key.trim(), DATE_FORMAT)
        .map_err(|e| format!("invalid date {date_key:?}: {e}"))?;
    let fields = entry
        .as_object()
        .ok_or_else(|| format!("entry is not an object: {entry}"))?;

    Ok(QuoteRow {
        symbol: symbol.to_string(),
        record_date,
        open: price(fields, FIELD_OPEN),
        high: price(fields, FIELD_HIGH),
        low: price(fields, FIELD_LOW),
        close: price(fields, FIELD_CLOSE),
        volume: volume(fields),
    })
}

fn field_text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

/// Missing, unparseable or out-of-range prices become zero.
fn price(fields: &Map<String, Value>, key: &str) -> Decimal {
    let Some(text) = field_text(fields, key) else {
        return Decimal::ZERO;
    };
    // Round before bounding: rounding can carry a value up to the limit.
    match parse_decimal(&text).map(|d| d.round_dp(PRICE_SCALE)) {
        Some(d) if d.abs() < Decimal::from(PRICE_LIMIT) => d,
        _ => {
            tracing::debug!(field = key, value = %text, "unusable price; defaulting to 0");
            Decimal::ZERO
        }
    }
}

fn volume(fields: &Map<String, Value>) -> i64 {
    field_text(fields, FIELD_VOLUME)
        .and_then(|text| {
            text.parse::<i64>()
                .ok()
                .or_else(|| parse_decimal(&text).and_then(|d| d.trunc().to_i64()))
        })
        .unwrap_or(0)
}
