use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const FIELD_OPEN: &str = "1. open";
pub const FIELD_HIGH: &str = "2. high";
pub const FIELD_LOW: &str = "3. low";
pub const FIELD_CLOSE: &str = "4. close";
pub const FIELD_VOLUME: &str = "5. volume";

/// Raw daily series as returned by the quote API. Sections stay as raw JSON so
/// one malformed entry cannot fail deserialization of the whole payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailySeriesPayload {
    #[serde(rename = "Meta Data", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(
        rename = "Time Series (Daily)",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub series: Option<Value>,
}

impl DailySeriesPayload {
    /// Number of date entries, zero when the section is absent or not an object.
    pub fn entry_count(&self) -> usize {
        self.series
            .as_ref()
            .and_then(Value::as_object)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRow {
    pub symbol: String,
    pub record_date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}
