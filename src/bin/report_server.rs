use std::{sync::Arc, time::Duration};

use exchange_reports::{
    api_client_config_from_env, init_logging, log_app_bind, log_app_start, log_source_selected,
    logging_config_from_env, report_router, server_config_from_env, ExchangeApiClient,
    InMemoryRecordSource, JsonFileRecordSource, PollingRecordSource, RecordSource, ServerConfig,
    SourceMode,
};

const FIRST_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let server_cfg = server_config_from_env()?;
    log_app_start(&logging_cfg, &server_cfg);

    // The blocking API client must be created outside the async runtime.
    let source = source_from_config(&server_cfg)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(server_cfg, source))
}

async fn serve(
    server_cfg: ServerConfig,
    source: Arc<dyn RecordSource>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = report_router(source, server_cfg.calendar);
    let listener = tokio::net::TcpListener::bind(server_cfg.addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn source_from_config(
    cfg: &ServerConfig,
) -> Result<Arc<dyn RecordSource>, Box<dyn std::error::Error>> {
    match cfg.source {
        SourceMode::Demo => {
            log_source_selected(cfg.source.as_str(), Some("REPORTS_SOURCE"), None);
            Ok(Arc::new(InMemoryRecordSource::demo()))
        }
        SourceMode::File => {
            let path = cfg
                .file_path
                .clone()
                .ok_or("REPORTS_SOURCE=file requires REPORTS_FILE")?;
            let source = JsonFileRecordSource::new(path);
            let detail = source.path().display().to_string();
            log_source_selected(cfg.source.as_str(), Some(detail.as_str()), None);
            Ok(Arc::new(source))
        }
        SourceMode::Api => {
            let client = ExchangeApiClient::new(api_client_config_from_env())?;
            log_source_selected(
                cfg.source.as_str(),
                Some(client.config().base_url.as_str()),
                Some(cfg.refresh_interval_ms),
            );
            let source = PollingRecordSource::spawn(client, cfg.refresh_interval_ms);
            if !source.wait_for_first_refresh(FIRST_REFRESH_TIMEOUT) {
                tracing::warn!(
                    component = "report_server",
                    event = "source.first_refresh.timeout",
                    timeout_ms = FIRST_REFRESH_TIMEOUT.as_millis() as u64
                );
            }
            Ok(Arc::new(source))
        }
    }
}
