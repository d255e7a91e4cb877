//! Grouped totals and record search for the profits and transactions views.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateError, AmountField};
use crate::records::FinancialRecord;

pub const UNKNOWN_GROUP: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupKey {
    Currency,
    TransactionType,
}

impl GroupKey {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupKey::Currency => "currency",
            GroupKey::TransactionType => "transactionType",
        }
    }

    pub fn value_of(self, record: &FinancialRecord) -> Option<&str> {
        match self {
            GroupKey::Currency => record.category.as_deref(),
            GroupKey::TransactionType => record.transaction_type.as_deref(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupKey {
    type Err = AggregateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_group(s)
    }
}

pub fn parse_group(input: &str) -> Result<GroupKey, AggregateError> {
    match input.trim() {
        "currency" => Ok(GroupKey::Currency),
        "transactionType" | "transaction_type" | "type" => Ok(GroupKey::TransactionType),
        _ => Err(AggregateError::InvalidGroup(input.to_string())),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldTotals {
    pub amount_primary: f64,
    pub amount_fee: f64,
    pub crypto_amount: f64,
    pub crypto_fee: f64,
}

impl FieldTotals {
    pub fn add(&mut self, record: &FinancialRecord) {
        self.amount_primary += record.amount_primary;
        self.amount_fee += record.amount_fee;
        self.crypto_amount += record.crypto_amount;
        self.crypto_fee += record.crypto_fee;
    }

    pub fn get(&self, field: AmountField) -> f64 {
        match field {
            AmountField::AmountPrimary => self.amount_primary,
            AmountField::AmountFee => self.amount_fee,
            AmountField::CryptoAmount => self.crypto_amount,
            AmountField::CryptoFee => self.crypto_fee,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTotal {
    pub group: String,
    pub count: usize,
    pub totals: FieldTotals,
    pub share_pct: f64,
}

/// Distinct non-empty values of `key`, in first-seen order.
pub fn distinct_values(records: &[FinancialRecord], key: GroupKey) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in records.iter().filter_map(|record| key.value_of(record)) {
        if !out.iter().any(|seen| seen == value) {
            out.push(value.to_string());
        }
    }
    out
}

/// Totals over every amount field for one selected group value, matched
/// ignoring ASCII case like [`RecordFilter`]; `None` or an empty selection
/// means all records.
pub fn totals_for(
    records: &[FinancialRecord],
    key: GroupKey,
    selected: Option<&str>,
) -> FieldTotals {
    let mut totals = FieldTotals::default();
    for record in records {
        if selected_matches(selected, key.value_of(record)) {
            totals.add(record);
        }
    }
    totals
}

/// Per-group totals sorted by descending fee, with each group's share of the
/// total fee.
pub fn breakdown(records: &[FinancialRecord], key: GroupKey) -> Vec<GroupTotal> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (usize, FieldTotals)> = HashMap::new();

    for record in records {
        let group = key.value_of(record).unwrap_or(UNKNOWN_GROUP);
        let entry = groups.entry(group.to_string()).or_insert_with(|| {
            order.push(group.to_string());
            (0, FieldTotals::default())
        });
        entry.0 += 1;
        entry.1.add(record);
    }

    let total_fee: f64 = groups.values().map(|(_, totals)| totals.amount_fee).sum();

    let mut out: Vec<GroupTotal> = order
        .into_iter()
        .filter_map(|group| {
            let (count, totals) = groups.remove(&group)?;
            let share_pct = if total_fee == 0.0 {
                0.0
            } else {
                totals.amount_fee / total_fee * 100.0
            };
            Some(GroupTotal {
                group,
                count,
                totals,
                share_pct,
            })
        })
        .collect();

    out.sort_by(|a, b| {
        b.totals
            .amount_fee
            .partial_cmp(&a.totals.amount_fee)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.group.cmp(&b.group))
    });
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub transaction_type: Option<String>,
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        blank(&self.currency) && blank(&self.transaction_type)
    }

    pub fn matches(&self, record: &FinancialRecord) -> bool {
        selected_matches(self.currency.as_deref(), GroupKey::Currency.value_of(record))
            && selected_matches(
                self.transaction_type.as_deref(),
                GroupKey::TransactionType.value_of(record),
            )
    }
}

/// Case-insensitive substring search over id, reference and transaction type.
pub fn search_records<'a>(
    records: &'a [FinancialRecord],
    query: &str,
) -> Vec<&'a FinancialRecord> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return records.iter().collect();
    }

    records
        .iter()
        .filter(|record| {
            [
                record.id.as_deref(),
                record.reference.as_deref(),
                record.transaction_type.as_deref(),
            ]
            .into_iter()
            .flatten()
            .any(|text| text.to_lowercase().contains(&needle))
        })
        .collect()
}

pub fn newest_first<'a>(
    records: impl IntoIterator<Item = &'a FinancialRecord>,
) -> Vec<&'a FinancialRecord> {
    let mut out: Vec<&FinancialRecord> = records.into_iter().collect();
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    out
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn selected_matches(selected: Option<&str>, actual: Option<&str>) -> bool {
    match selected.map(str::trim) {
        None | Some("") => true,
        Some(wanted) => actual.is_some_and(|value| value.eq_ignore_ascii_case(wanted)),
    }
}
