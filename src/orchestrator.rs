//! Wires record source → transfer engine → report for one run.

use std::path::PathBuf;

use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::SetupError;
use crate::outcome::BatchSummary;
use crate::records::{CsvRecordSource, MssqlRecordSource, RecordSource};
use crate::report;
use crate::transfer::http::build_client;
use crate::transfer::{
    HttpFetcher, HttpUploader, ImageFetcher, ImageUploader, RunStats, StagingArea, TransferEngine,
};

/// Where this run's records come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordInput {
    SqlServer,
    CsvFile(PathBuf),
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub summary: BatchSummary,
    pub stats: RunStats,
    pub report_path: PathBuf,
}

/// Production run: real record source, reqwest-backed engine, CSV report.
pub async fn run(config: &AppConfig, input: RecordInput) -> Result<RunSummary, SetupError> {
    let run_id = Uuid::new_v4();
    info!(%run_id, input = ?input, "starting process");
    let staging = StagingArea::create(&config.download_path).await?;

    let mut source: Box<dyn RecordSource> = match input {
        RecordInput::SqlServer => {
            let db = config
                .database
                .as_ref()
                .ok_or_else(|| SetupError::config("SQL Server settings not loaded"))?;
            let source = MssqlRecordSource::connect(db, config.media_resource_id.as_str())
                .await
                .map_err(SetupError::Source)?;
            Box::new(source)
        }
        RecordInput::CsvFile(path) => Box::new(CsvRecordSource::new(path)),
    };

    let client = build_client(config.transfer.request_timeout)?;
    let engine = TransferEngine::new(
        config.transfer.clone(),
        HttpFetcher::new(client.clone()),
        HttpUploader::new(client, config.upload.clone()),
        staging,
    );
    execute(config, source.as_mut(), &engine)
        .instrument(info_span!("run", %run_id))
        .await
}

/// Fetch records, transfer them and write the report.
pub async fn execute<F, U>(
    config: &AppConfig,
    source: &mut dyn RecordSource,
    engine: &TransferEngine<F, U>,
) -> Result<RunSummary, SetupError>
where
    F: ImageFetcher,
    U: ImageUploader,
{
    let records = source
        .fetch_records(config.record_limit)
        .await
        .map_err(SetupError::Source)?;
    let skipped = source.skipped();
    if let Err(e) = source.close().await {
        warn!(error = %e, "record source did not close cleanly");
    }
    info!(total = records.len(), skipped, "records to process");

    let run = engine.run(records).await?;
    report::write_report_file(&config.report_path, &run.batch)?;

    let summary = BatchSummary {
        skipped,
        ..run.batch.summary()
    };
    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed(),
        peak_in_flight = run.stats.peak_in_flight,
        elapsed_ms = run.stats.elapsed.as_millis() as u64,
        "{}",
        report::summary_line(&summary)
    );
    if summary.looks_systemic() {
        warn!(
            "every record failed the same way; check UPLOAD_URL, API_KEY and source reachability"
        );
    }
    info!(report = %config.report_path.display(), "process completed");

    Ok(RunSummary {
        summary,
        stats: run.stats,
        report_path: config.report_path.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TransferConfig, UploadConfig};
    use crate::error::StepError;
    use crate::records::ImageRecord;
    use crate::transfer::{UploadReceipt, UploadRequest};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;
    use url::Url;

    struct HostFetcher;

    #[async_trait]
    impl ImageFetcher for HostFetcher {
        async fn fetch(&self, url: &Url) -> Result<Bytes, StepError> {
            match url.host_str() {
                Some("down.example.com") => Err(StepError::Network("dns error".into())),
                _ => Ok(Bytes::from_static(b"\x89PNG")),
            }
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl ImageUploader for AcceptAll {
        async fn upload(&self, _request: UploadRequest<'_>) -> Result<UploadReceipt, StepError> {
            Ok(UploadReceipt {
                status: 201,
                body: "{}".into(),
            })
        }
    }

    struct FailingSource;

    #[async_trait]
    impl RecordSource for FailingSource {
        async fn fetch_records(&mut self, _limit: u32) -> anyhow::Result<Vec<ImageRecord>> {
            anyhow::bail!("login failed for user 'migrator'")
        }
    }

    struct PartlyUnusableSource;

    #[async_trait]
    impl RecordSource for PartlyUnusableSource {
        async fn fetch_records(&mut self, _limit: u32) -> anyhow::Result<Vec<ImageRecord>> {
            Ok(vec![ImageRecord::new("1", "10", "https://cdn.example.com/a.png")])
        }

        fn skipped(&self) -> usize {
            2
        }
    }

    fn app_config(dir: &std::path::Path) -> AppConfig {
        AppConfig {
            database: None,
            upload: UploadConfig {
                url: Url::parse("https://storage.example.com/upload").unwrap(),
                api_key: "k".into(),
                tenant_id: "2".into(),
            },
            transfer: TransferConfig {
                max_concurrency: 2,
                max_attempts: 2,
                request_timeout: Duration::from_secs(1),
                base_backoff: Duration::from_millis(5),
                request_delay: Duration::ZERO,
            },
            download_path: dir.join("images"),
            report_path: dir.join("out").join("output.csv"),
            log_file: dir.join("process.log"),
            record_limit: 100,
            media_resource_id: crate::config::DEFAULT_MEDIA_RESOURCE_ID.to_string(),
        }
    }

    #[tokio::test]
    async fn csv_records_flow_into_report() {
        let dir = std::env::temp_dir().join(format!("media-migrate-run-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let input = dir.join("records.csv");
        tokio::fs::write(
            &input,
            "product_id,media_id,source_url\n\
             1,10,https://cdn.example.com/a.png\n\
             2,20,https://down.example.com/b.png\n\
             3,30,https://cdn.example.com/c.png\n",
        )
        .await
        .unwrap();

        let config = app_config(&dir);
        let staging = StagingArea::create(&config.download_path).await.unwrap();
        let engine = TransferEngine::new(config.transfer.clone(), HostFetcher, AcceptAll, staging);
        let mut source = CsvRecordSource::new(&input);
        let result = execute(&config, &mut source, &engine).await.unwrap();

        assert_eq!(result.summary.total, 3);
        assert_eq!(result.summary.succeeded, 2);
        assert_eq!(result.summary.failed_download, 1);
        let report = tokio::fs::read_to_string(&result.report_path).await.unwrap();
        assert_eq!(report.lines().count(), 4);
        assert!(config.download_path.join("1_10_a.png").exists());
        assert!(!config.download_path.join("2_20_b.png").exists());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn source_failure_is_a_setup_error() {
        let dir = std::env::temp_dir().join(format!("media-migrate-run-{}", Uuid::new_v4()));
        let config = app_config(&dir);
        let staging = StagingArea::create(&config.download_path).await.unwrap();
        let engine = TransferEngine::new(config.transfer.clone(), HostFetcher, AcceptAll, staging);
        let err = execute(&config, &mut FailingSource, &engine).await.unwrap_err();
        assert!(matches!(err, SetupError::Source(_)));
        assert_eq!(err.exit_code(), 3);
        assert!(!config.report_path.exists());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn skipped_source_rows_reach_the_summary() {
        let dir = std::env::temp_dir().join(format!("media-migrate-run-{}", Uuid::new_v4()));
        let config = app_config(&dir);
        let staging = StagingArea::create(&config.download_path).await.unwrap();
        let engine = TransferEngine::new(config.transfer.clone(), HostFetcher, AcceptAll, staging);
        let result = execute(&config, &mut PartlyUnusableSource, &engine).await.unwrap();
        assert_eq!(result.summary.total, 1);
        assert_eq!(result.summary.skipped, 2);
        assert!(report::summary_line(&result.summary).contains("2 source rows skipped"));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
