//! Financial records as delivered by the exchange API and their validated form.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::aggregate::AmountField;

/// Epoch values at or above this magnitude are milliseconds, below it seconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRecord {
    pub timestamp: DateTime<Utc>,
    pub amount_primary: f64,
    pub amount_fee: f64,
    #[serde(default)]
    pub crypto_amount: f64,
    #[serde(default)]
    pub crypto_fee: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl FinancialRecord {
    pub fn new(timestamp: DateTime<Utc>, amount_primary: f64, amount_fee: f64) -> Self {
        Self {
            timestamp,
            amount_primary,
            amount_fee,
            crypto_amount: 0.0,
            crypto_fee: 0.0,
            category: None,
            transaction_type: None,
            id: None,
            user_id: None,
            reference: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_transaction_type(mut self, transaction_type: impl Into<String>) -> Self {
        self.transaction_type = Some(transaction_type.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_crypto(mut self, amount: f64, fee: f64) -> Self {
        self.crypto_amount = amount;
        self.crypto_fee = fee;
        self
    }

    pub fn amount(&self, field: AmountField) -> f64 {
        match field {
            AmountField::AmountPrimary => self.amount_primary,
            AmountField::AmountFee => self.amount_fee,
            AmountField::CryptoAmount => self.crypto_amount,
            AmountField::CryptoFee => self.crypto_fee,
        }
    }
}

/// Wire shape shared by the "list profits" and "list transactions" payloads.
///
/// Amounts may arrive as numbers or numeric strings; ids and labels as
/// strings, numbers or populated `{ "_id": ... }` objects. Every field is kept
/// as raw JSON so one odd value never fails the surrounding payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<Value>,
    #[serde(rename = "nairaAmount", default, skip_serializing_if = "Option::is_none")]
    pub naira_amount: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Value>,
    #[serde(rename = "nairaFee", default, skip_serializing_if = "Option::is_none")]
    pub naira_fee: Option<Value>,
    #[serde(rename = "cryptoAmount", default, skip_serializing_if = "Option::is_none")]
    pub crypto_amount: Option<Value>,
    #[serde(rename = "cryptoFee", default, skip_serializing_if = "Option::is_none")]
    pub crypto_fee: Option<Value>,
    #[serde(rename = "transactionType", default, skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<Value>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Value>,
    #[serde(rename = "trxId", default, skip_serializing_if = "Option::is_none")]
    pub trx_id: Option<Value>,
    /// Set when the payload element could not be read as a record at all.
    #[serde(skip)]
    pub malformed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record has no timestamp")]
    MissingTimestamp,
    #[error("unparseable timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("field {field} is not numeric: '{value}'")]
    InvalidAmount { field: &'static str, value: String },
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// A record excluded from aggregation, reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidRecord {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    pub records: Vec<FinancialRecord>,
    #[serde(default)]
    pub rejected: Vec<InvalidRecord>,
}

impl RecordBatch {
    pub fn from_records(records: Vec<FinancialRecord>) -> Self {
        Self {
            records,
            rejected: Vec::new(),
        }
    }

    /// Keeps the rejected list intact so warnings survive filtering.
    pub fn filtered(&self, mut keep: impl FnMut(&FinancialRecord) -> bool) -> RecordBatch {
        RecordBatch {
            records: self
                .records
                .iter()
                .filter(|record| keep(record))
                .cloned()
                .collect(),
            rejected: self.rejected.clone(),
        }
    }
}

impl RawRecord {
    pub fn id_text(&self) -> Option<String> {
        self.id.as_ref().and_then(value_text)
    }

    /// Reads one payload element; anything that is not a record object is
    /// kept with its reason so it can be rejected at its index.
    pub fn from_value(value: Value) -> RawRecord {
        let kind = match &value {
            Value::Object(_) => None,
            Value::Null => Some("null"),
            Value::Bool(_) => Some("boolean"),
            Value::Number(_) => Some("number"),
            Value::String(_) => Some("string"),
            Value::Array(_) => Some("array"),
        };
        if let Some(kind) = kind {
            return RawRecord::malformed(format!("expected a JSON object, found {kind}"));
        }
        serde_json::from_value(value).unwrap_or_else(|err| RawRecord::malformed(err.to_string()))
    }

    fn malformed(reason: String) -> RawRecord {
        RawRecord {
            malformed: Some(reason),
            ..RawRecord::default()
        }
    }

    pub fn to_record(&self) -> Result<FinancialRecord, RecordError> {
        if let Some(reason) = &self.malformed {
            return Err(RecordError::Malformed(reason.clone()));
        }

        let raw_ts = self
            .timestamp
            .as_ref()
            .filter(|value| !value.is_null())
            .or(self.created_at.as_ref().filter(|value| !value.is_null()))
            .ok_or(RecordError::MissingTimestamp)?;
        let timestamp = parse_timestamp_value(raw_ts)?;

        let primary_raw = self.naira_amount.as_ref().or(self.amount.as_ref());

        Ok(FinancialRecord {
            timestamp,
            amount_primary: parse_amount(primary_raw, "nairaAmount")?,
            amount_fee: parse_amount(self.naira_fee.as_ref(), "nairaFee")?,
            crypto_amount: parse_amount(self.crypto_amount.as_ref(), "cryptoAmount")?,
            crypto_fee: parse_amount(self.crypto_fee.as_ref(), "cryptoFee")?,
            category: self.currency.as_ref().and_then(value_text),
            transaction_type: self
                .transaction_type
                .as_ref()
                .and_then(value_text)
                .or_else(|| self.kind.as_ref().and_then(value_text)),
            id: self.id_text(),
            user_id: self.user_id.as_ref().and_then(value_text),
            reference: self.trx_id.as_ref().and_then(value_text),
        })
    }
}

/// Validates a raw batch; unparseable records are excluded and listed in
/// `rejected` instead of failing the whole batch.
pub fn decode_records(raw: &[RawRecord]) -> RecordBatch {
    let mut batch = RecordBatch {
        records: Vec::with_capacity(raw.len()),
        rejected: Vec::new(),
    };

    for (index, entry) in raw.iter().enumerate() {
        match entry.to_record() {
            Ok(record) => batch.records.push(record),
            Err(err) => batch.rejected.push(InvalidRecord {
                index,
                id: entry.id_text(),
                reason: err.to_string(),
            }),
        }
    }

    if !batch.rejected.is_empty() {
        warn!(
            component = "records",
            event = "records.rejected",
            accepted = batch.records.len(),
            rejected = batch.rejected.len(),
            first_reason = %batch.rejected[0].reason
        );
    }

    batch
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed records payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("records payload reported failure: {0}")]
    Rejected(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordsPayload {
    List(Vec<Value>),
    Envelope(RecordsEnvelope),
}

#[derive(Debug, Deserialize)]
struct RecordsEnvelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Vec<Value>>,
    #[serde(rename = "transactionH", default)]
    transactions: Option<Vec<Value>>,
}

/// Converts payload elements one by one; see [`RawRecord::from_value`].
pub fn raw_records_from_values(values: Vec<Value>) -> Vec<RawRecord> {
    values.into_iter().map(RawRecord::from_value).collect()
}

/// Accepts a bare JSON array or the API envelope
/// `{ "success": bool, "data" | "transactionH": [...], "message": ... }`.
pub fn parse_records_payload(bytes: &[u8]) -> Result<Vec<RawRecord>, PayloadError> {
    match serde_json::from_slice::<RecordsPayload>(bytes)? {
        RecordsPayload::List(values) => Ok(raw_records_from_values(values)),
        RecordsPayload::Envelope(envelope) => {
            if envelope.success == Some(false) {
                return Err(PayloadError::Rejected(
                    envelope
                        .message
                        .unwrap_or_else(|| "success=false without message".to_string()),
                ));
            }
            Ok(raw_records_from_values(
                envelope
                    .data
                    .or(envelope.transactions)
                    .unwrap_or_default(),
            ))
        }
    }
}

pub fn parse_timestamp_value(value: &Value) -> Result<DateTime<Utc>, RecordError> {
    match value {
        Value::String(raw) => parse_timestamp_str(raw),
        Value::Number(number) => number
            .as_i64()
            .and_then(epoch_to_utc)
            .ok_or_else(|| RecordError::InvalidTimestamp(number.to_string())),
        other => Err(RecordError::InvalidTimestamp(other.to_string())),
    }
}

pub fn parse_timestamp_str(raw: &str) -> Result<DateTime<Utc>, RecordError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RecordError::MissingTimestamp);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&midnight));
        }
    }

    trimmed
        .parse::<i64>()
        .ok()
        .and_then(epoch_to_utc)
        .ok_or_else(|| RecordError::InvalidTimestamp(trimmed.to_string()))
}

fn epoch_to_utc(raw: i64) -> Option<DateTime<Utc>> {
    if raw.abs() >= EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

fn parse_amount(value: Option<&Value>, field: &'static str) -> Result<f64, RecordError> {
    match value {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(number)) => number.as_f64().ok_or_else(|| RecordError::InvalidAmount {
            field,
            value: number.to_string(),
        }),
        Some(Value::String(raw)) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(0.0);
            }
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|parsed| parsed.is_finite())
                .ok_or_else(|| RecordError::InvalidAmount {
                    field,
                    value: trimmed.to_string(),
                })
        }
        Some(other) => Err(RecordError::InvalidAmount {
            field,
            value: other.to_string(),
        }),
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => non_empty(Some(text.as_str())),
        Value::Number(number) => Some(number.to_string()),
        Value::Object(map) => map.get("_id").and_then(value_text),
        _ => None,
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
