use std::path::PathBuf;

use exchange_reports::{
    breakdown, parse_field, parse_now, resolve_now, GroupKey, JsonFileRecordSource,
    PeriodAggregator, ReportCalendar, DEFAULT_FIELD,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let path = args
        .next()
        .or_else(|| std::env::var("REPORTS_FILE").ok())
        .map(PathBuf::from)
        .ok_or("usage: profit_report <records.json> [field] [now]")?;
    let field = match args.next() {
        Some(raw) => parse_field(&raw)?,
        None => DEFAULT_FIELD,
    };
    let now = resolve_now(args.next().as_deref().map(parse_now).transpose()?);
    let calendar = match std::env::var("REPORTS_TZ") {
        Ok(name) if !name.trim().is_empty() => ReportCalendar::parse(&name)?,
        _ => ReportCalendar::utc(),
    };

    let batch = JsonFileRecordSource::new(path.clone()).load()?;
    let overview = PeriodAggregator::new(calendar).overview(&batch, field, now)?;

    println!(
        "{} | field={} now={} tz={} records={} rejected={}",
        path.display(),
        field.as_str(),
        now.to_rfc3339(),
        calendar.tz().name(),
        batch.records.len(),
        batch.rejected.len()
    );

    for report in &overview.windows {
        println!(
            "  {:<9} since {} | sum={:.2} count={} previous={:.2} change={}",
            report.window.as_str(),
            report.window_start.to_rfc3339(),
            report.sum,
            report.count,
            report.previous_sum,
            report.change_label
        );
    }

    println!("\nBy currency (all time)");
    for group in breakdown(&batch.records, GroupKey::Currency) {
        println!(
            "  {:<8} | count={} {}={:.2} fee_share={:.1}%",
            group.group,
            group.count,
            field.as_str(),
            group.totals.get(field),
            group.share_pct
        );
    }

    for invalid in &overview.rejected {
        println!(
            "  rejected #{} id={} reason={}",
            invalid.index,
            invalid.id.as_deref().unwrap_or("-"),
            invalid.reason
        );
    }

    Ok(())
}
