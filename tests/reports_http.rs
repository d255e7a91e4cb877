use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use exchange_reports::{
    decode_records, report_router, InMemoryRecordSource, RawRecord, RecordSnapshot,
    RecordSource, ReportCalendar,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;

const NOW: &str = "2024-06-15T12:00:00Z";

fn fixture_records() -> Vec<RawRecord> {
    serde_json::from_value(json!([
        {
            "_id": "p1",
            "timestamp": "2024-06-15T09:00:00Z",
            "currency": "USDT",
            "transactionType": "buy",
            "nairaAmount": 4000,
            "nairaFee": 100,
            "trxId": "TRX-0001"
        },
        {
            "_id": "p2",
            "timestamp": "2024-06-01T00:00:00Z",
            "currency": "BTC",
            "transactionType": "sell",
            "nairaAmount": "2000",
            "nairaFee": "50"
        },
        {
            "_id": "p3",
            "createdAt": "2024-05-01T08:00:00Z",
            "currency": "USDT",
            "type": "swap",
            "nairaAmount": 1200,
            "nairaFee": 30
        },
        {
            "_id": "broken",
            "timestamp": "2024-06-10T00:00:00Z",
            "nairaFee": "n/a"
        }
    ]))
    .unwrap()
}

fn app() -> Router {
    let batch = decode_records(&fixture_records());
    let source = Arc::new(InMemoryRecordSource::new(batch));
    report_router(source, ReportCalendar::utc())
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn summary_reports_current_and_previous_month() {
    let uri = format!("/reports/summary?window=month&now={NOW}");
    let (status, body) = get_json(app(), &uri).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["window"], "month");
    assert_eq!(body["field"], "amountFee");
    assert_eq!(body["window_start"], "2024-05-15T12:00:00Z");
    assert_eq!(body["previous_window_start"], "2024-04-15T12:00:00Z");
    assert_eq!(body["sum"], 150.0);
    assert_eq!(body["count"], 2);
    assert_eq!(body["previous_sum"], 30.0);
    assert_eq!(body["percentage_change"], 400.0);
    assert_eq!(body["change_label"], "+400.00%");
    assert_eq!(body["rejected"].as_array().unwrap().len(), 1);
    assert_eq!(body["rejected"][0]["id"], "broken");
    assert!(body["source"]["last_error"].is_null());
}

#[tokio::test]
async fn summary_filters_by_currency_and_field() {
    let (status, body) = get_json(
        app(),
        &format!("/reports/summary?window=year&field=nairaAmount&currency=usdt&now={NOW}"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["field"], "amountPrimary");
    assert_eq!(body["sum"], 5200.0);
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn summary_rejects_unknown_window_and_field() {
    let (status, body) = get_json(app(), "/reports/summary?window=fortnight").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("invalid time window 'fortnight'"));

    let (status, body) = get_json(app(), "/reports/summary?field=profit").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("invalid aggregation field 'profit'"));

    let (status, _) = get_json(app(), "/reports/summary?now=yesterday").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn summary_accepts_unencoded_plus_offset() {
    let uri = "/reports/summary?window=day&now=2024-06-15T13:00:00+01:00";
    let (status, body) = get_json(app(), uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["window_start"], "2024-06-14T12:00:00Z");

    let (status, encoded) =
        get_json(app(), "/reports/summary?window=day&now=2024-06-15T13:00:00%2B01:00").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(encoded, body);
}

#[tokio::test]
async fn malformed_query_and_body_get_json_errors() {
    let (status, body) = get_json(app(), "/reports/records?limit=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/reports/window")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn overview_has_one_entry_per_window() {
    let (status, body) = get_json(app(), &format!("/reports/overview?now={NOW}")).await;

    assert_eq!(status, StatusCode::OK);
    let windows = body["windows"].as_array().unwrap();
    let names: Vec<&str> = windows
        .iter()
        .map(|entry| entry["window"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["day", "week", "month", "sixMonths", "year"]);

    let sums: Vec<f64> = windows
        .iter()
        .map(|entry| entry["sum"].as_f64().unwrap())
        .collect();
    assert_eq!(sums, [100.0, 100.0, 150.0, 180.0, 180.0]);
    assert!(sums.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test]
async fn breakdown_groups_by_currency_within_window() {
    let (status, body) = get_json(
        app(),
        &format!("/reports/breakdown?group=currency&selected=USDT&window=month&now={NOW}"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["group"], "currency");
    assert_eq!(body["values"], json!(["USDT", "BTC"]));
    assert_eq!(body["selected_totals"]["amount_fee"], 100.0);

    let lower = format!("/reports/breakdown?group=currency&selected=usdt&window=month&now={NOW}");
    let (_, lower) = get_json(app(), &lower).await;
    assert_eq!(lower["selected_totals"], body["selected_totals"]);

    let groups = body["groups"].as_array().unwrap();
    assert_eq!(groups[0]["group"], "USDT");
    assert_eq!(groups[0]["count"], 1);
    assert_eq!(groups[1]["group"], "BTC");
    let shares: f64 = groups
        .iter()
        .map(|group| group["share_pct"].as_f64().unwrap())
        .sum();
    assert!((shares - 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn breakdown_rejects_unknown_group() {
    let (status, body) = get_json(app(), "/reports/breakdown?group=country").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("country"));
}

#[tokio::test]
async fn records_search_is_case_insensitive_and_newest_first() {
    let (status, body) = get_json(app(), "/reports/records?search=trx-0001").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["records"][0]["id"], "p1");

    let (_, body) = get_json(app(), "/reports/records?limit=2").await;
    assert_eq!(body["total"], 3);
    let ids: Vec<&str> = body["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|record| record["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["p1", "p2"]);
}

#[tokio::test]
async fn csv_export_sets_attachment_headers() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri(format!("/reports/export.csv?window=month&now={NOW}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/csv; charset=utf-8"
    );
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"report-month.csv\""
    );

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("id,timestamp,currency"));
    assert!(lines[1].starts_with("p1,2024-06-15T09:00:00+00:00,USDT,buy,TRX-0001"));
    assert!(lines[2].starts_with("p2,"));
}

#[tokio::test]
async fn posted_window_aggregates_the_request_batch() {
    let request = json!({
        "window": "week",
        "now": NOW,
        "records": [
            { "_id": "a", "timestamp": "2024-06-14T00:00:00Z", "nairaFee": 60 },
            { "_id": "b", "timestamp": "2024-06-05T00:00:00Z", "nairaFee": 40 },
            { "_id": "c", "nairaFee": 10 },
            null
        ]
    });

    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/reports/window")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(request.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["sum"], 60.0);
    assert_eq!(body["previous_sum"], 40.0);
    assert_eq!(body["percentage_change"], 50.0);
    assert_eq!(body["rejected"][0]["id"], "c");
    assert_eq!(body["rejected"][0]["index"], 2);
    assert_eq!(body["rejected"][1]["index"], 3);
    assert!(body["rejected"][1]["id"].is_null());
}

#[tokio::test]
async fn health_reports_degraded_when_source_failed() {
    struct FailingSource;

    impl RecordSource for FailingSource {
        fn snapshot(&self) -> RecordSnapshot {
            RecordSnapshot {
                last_error: Some("upstream returned 502".to_string()),
                ..RecordSnapshot::default()
            }
        }
    }

    let (status, body) = get_json(app(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["records"], 3);
    assert_eq!(body["rejected"], 1);

    let degraded = report_router(Arc::new(FailingSource), ReportCalendar::utc());
    let (status, body) = get_json(degraded, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["source"]["last_error"], "upstream returned 502");
}
