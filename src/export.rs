//! CSV report export.

use std::io::Write;

use serde::Serialize;

use crate::records::FinancialRecord;

pub const EXPORT_HEADERS: [&str; 9] = [
    "id",
    "timestamp",
    "currency",
    "transaction_type",
    "reference",
    "amount_primary",
    "amount_fee",
    "crypto_amount",
    "crypto_fee",
];

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    id: &'a str,
    timestamp: String,
    currency: &'a str,
    transaction_type: &'a str,
    reference: &'a str,
    amount_primary: f64,
    amount_fee: f64,
    crypto_amount: f64,
    crypto_fee: f64,
}

impl<'a> From<&'a FinancialRecord> for ExportRow<'a> {
    fn from(record: &'a FinancialRecord) -> Self {
        Self {
            id: record.id.as_deref().unwrap_or_default(),
            timestamp: record.timestamp.to_rfc3339(),
            currency: record.category.as_deref().unwrap_or_default(),
            transaction_type: record.transaction_type.as_deref().unwrap_or_default(),
            reference: record.reference.as_deref().unwrap_or_default(),
            amount_primary: record.amount_primary,
            amount_fee: record.amount_fee,
            crypto_amount: record.crypto_amount,
            crypto_fee: record.crypto_fee,
        }
    }
}

pub fn write_records_csv<'a, W: Write>(
    records: impl IntoIterator<Item = &'a FinancialRecord>,
    writer: W,
) -> Result<(), csv::Error> {
    let mut out = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    out.write_record(EXPORT_HEADERS)?;
    for record in records {
        out.serialize(ExportRow::from(record))?;
    }
    out.flush()?;
    Ok(())
}

pub fn records_to_csv<'a>(
    records: impl IntoIterator<Item = &'a FinancialRecord>,
) -> Result<String, csv::Error> {
    let mut buf = Vec::new();
    write_records_csv(records, &mut buf)?;
    String::from_utf8(buf).map_err(|err| {
        csv::Error::from(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    })
}
