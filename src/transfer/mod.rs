//! Bounded-concurrency download → stage → upload pipeline.
//!
//! All record futures run on the calling task through a `FuturesUnordered`;
//! a semaphore admits at most `max_concurrency` of them past the gate at a
//! time. Each admitted record runs attempts through [`retry::retry_loop`]
//! and reports exactly one outcome to the [`ResultAggregator`].

pub mod http;
pub mod retry;
pub mod staging;

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{AcquireError, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::aggregate::{OutcomeSlot, RecordState, ResultAggregator};
use crate::config::TransferConfig;
use crate::error::StepError;
use crate::outcome::{TransferBatch, TransferOutcome, TransferStatus};
use crate::records::ImageRecord;

pub use http::{HttpFetcher, HttpUploader, ImageFetcher, ImageUploader, UploadReceipt, UploadRequest};
pub use retry::{AttemptFailure, Phase, RetryPolicy, StepOutcome};
pub use staging::StagingArea;

/// Log a progress line every this many completed records.
const PROGRESS_EVERY: usize = 10;

/// Current and peak number of records holding an admission permit.
#[derive(Debug, Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    pub fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { gauge: self }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct InFlightGuard<'a> {
    gauge: &'a InFlightGauge,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub max_concurrency: usize,
    pub peak_in_flight: usize,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct TransferRun {
    pub batch: TransferBatch,
    pub stats: RunStats,
}

#[derive(Debug)]
struct AttemptSuccess {
    staged_path: std::path::PathBuf,
    receipt: UploadReceipt,
}

pub struct TransferEngine<F, U> {
    config: TransferConfig,
    fetcher: F,
    uploader: U,
    staging: StagingArea,
}

impl<F, U> TransferEngine<F, U>
where
    F: ImageFetcher,
    U: ImageUploader,
{
    pub fn new(config: TransferConfig, fetcher: F, uploader: U, staging: StagingArea) -> Self {
        Self {
            config,
            fetcher,
            uploader,
            staging,
        }
    }

    /// Transfer every record and return one outcome per record, in input order.
    ///
    /// Per-record failures never surface as `Err`; an error here means the
    /// aggregator lost track of a record.
    pub async fn run(&self, records: Vec<ImageRecord>) -> anyhow::Result<TransferRun> {
        let total = records.len();
        let started = Instant::now();
        let (aggregator, slots) = ResultAggregator::new(total);
        let gate = Semaphore::new(self.config.max_concurrency.max(1));
        let gauge = InFlightGauge::default();

        info!(
            total,
            max_concurrency = self.config.max_concurrency,
            max_attempts = self.config.max_attempts,
            "transfer run start"
        );

        let mut pending: FuturesUnordered<_> = records
            .into_iter()
            .zip(slots)
            .map(|(record, slot)| self.process(record, slot, &gate, &gauge, &aggregator))
            .collect();
        while pending.next().await.is_some() {}
        drop(pending);

        let stats = RunStats {
            max_concurrency: self.config.max_concurrency,
            peak_in_flight: gauge.peak(),
            elapsed: started.elapsed(),
        };
        let progress = aggregator.progress();
        let batch = aggregator.finalize()?;
        info!(
            total,
            succeeded = progress.succeeded,
            failed = progress.failed,
            peak_in_flight = stats.peak_in_flight,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "transfer run finished"
        );
        Ok(TransferRun { batch, stats })
    }

    async fn process(
        &self,
        record: ImageRecord,
        slot: OutcomeSlot,
        gate: &Semaphore,
        gauge: &InFlightGauge,
        aggregator: &ResultAggregator,
    ) {
        // Held until the outcome is recorded.
        let permit = gate.acquire().await;
        let outcome = match &permit {
            Ok(_) => {
                let _in_flight = gauge.enter();
                self.transfer(record, &slot, aggregator).await
            }
            Err(e) => admission_failure(record, &slot, aggregator, e),
        };

        if outcome.status.is_success() {
            info!(
                product_id = %outcome.record.product_id,
                media_id = %outcome.record.media_id,
                attempts = outcome.attempts,
                duration_ms = outcome.duration_ms,
                "record migrated"
            );
        } else {
            error!(
                product_id = %outcome.record.product_id,
                media_id = %outcome.record.media_id,
                status = %outcome.status,
                attempts = outcome.attempts,
                duration_ms = outcome.duration_ms,
                error = outcome.error_detail.as_deref().unwrap_or(""),
                "record failed"
            );
        }

        match aggregator.record(slot, outcome) {
            Ok(progress) => {
                let done = progress.completed();
                if done % PROGRESS_EVERY == 0 || done == progress.total {
                    info!(
                        completed = done,
                        total = progress.total,
                        succeeded = progress.succeeded,
                        failed = progress.failed,
                        in_flight = progress.in_flight,
                        "progress"
                    );
                }
            }
            Err(e) => error!(error = %e, "failed to record outcome"),
        }
    }

    /// All attempts for one admitted record, folded into its outcome.
    async fn transfer(
        &self,
        record: ImageRecord,
        slot: &OutcomeSlot,
        aggregator: &ResultAggregator,
    ) -> TransferOutcome {
        let started = Instant::now();
        let policy = RetryPolicy::from(&self.config);

        let report = retry::retry_loop(
            &policy,
            |attempt| self.attempt(&record, slot, aggregator, attempt),
            |next, delay, failure: &AttemptFailure| {
                if let Err(e) = aggregator.transition(slot, RecordState::Retrying { attempt: next }) {
                    warn!(error = %e, "record state transition rejected");
                }
                warn!(
                    product_id = %record.product_id,
                    media_id = %record.media_id,
                    next_attempt = next,
                    max_attempts = policy.max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    phase = ?failure.phase,
                    error = %failure.error,
                    "attempt failed; backing off"
                );
            },
        )
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match report.result {
            Ok(done) => TransferOutcome {
                status: TransferStatus::Succeeded,
                attempts: report.attempts,
                error_detail: None,
                duration_ms,
                staged_path: Some(done.staged_path),
                response_excerpt: Some(http::excerpt(&done.receipt.body)).filter(|s| !s.is_empty()),
                record,
            },
            Err(failure) => TransferOutcome {
                status: failure.status(),
                attempts: report.attempts,
                error_detail: Some(failure.error.to_string()),
                duration_ms,
                staged_path: failure.staged_path,
                response_excerpt: None,
                record,
            },
        }
    }

    /// One download → stage → upload cycle.
    async fn attempt(
        &self,
        record: &ImageRecord,
        slot: &OutcomeSlot,
        aggregator: &ResultAggregator,
        attempt: u32,
    ) -> StepOutcome<AttemptSuccess, AttemptFailure> {
        if let Err(e) = aggregator.transition(slot, RecordState::InFlight { attempt }) {
            warn!(error = %e, "record state transition rejected");
        }
        info!(
            product_id = %record.product_id,
            media_id = %record.media_id,
            attempt,
            max_attempts = self.config.max_attempts,
            url = %record.source_url,
            "attempt start"
        );

        let url = match parse_source_url(&record.source_url) {
            Ok(u) => u,
            Err(e) => return AttemptFailure::new(Phase::Prepare, e).into_outcome(),
        };

        self.pace().await;
        let bytes = match self.timed(self.fetcher.fetch(&url)).await {
            Ok(b) => b,
            Err(e) => {
                warn!(product_id = %record.product_id, media_id = %record.media_id, attempt, error = %e, "download failed");
                return AttemptFailure::new(Phase::Download, e).into_outcome();
            }
        };
        debug!(product_id = %record.product_id, media_id = %record.media_id, bytes = bytes.len(), "downloaded");

        let staged_path = match self.staging.write(record, &bytes).await {
            Ok(p) => p,
            Err(e) => {
                warn!(product_id = %record.product_id, media_id = %record.media_id, attempt, error = %e, "staging failed");
                return AttemptFailure::new(Phase::Stage, e).into_outcome();
            }
        };
        info!(path = %staged_path.display(), "image downloaded and staged");

        let file_name = StagingArea::staged_name(record);
        self.pace().await;
        let upload = self.uploader.upload(UploadRequest {
            record,
            file_name: &file_name,
            bytes,
        });
        match self.timed(upload).await {
            Ok(receipt) => {
                info!(product_id = %record.product_id, media_id = %record.media_id, attempt, status = receipt.status, "upload succeeded");
                StepOutcome::Success(AttemptSuccess {
                    staged_path,
                    receipt,
                })
            }
            Err(e) => {
                warn!(product_id = %record.product_id, media_id = %record.media_id, attempt, error = %e, "upload failed");
                AttemptFailure::new(Phase::Upload, e)
                    .with_staged(staged_path)
                    .into_outcome()
            }
        }
    }

    /// Throttle applied before every outbound request.
    async fn pace(&self) {
        if !self.config.request_delay.is_zero() {
            tokio::time::sleep(self.config.request_delay).await;
        }
    }

    async fn timed<T>(&self, fut: impl Future<Output = Result<T, StepError>>) -> Result<T, StepError> {
        let limit = self.config.request_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(StepError::Timeout(limit)),
        }
    }
}

/// A record that could not pass the admission gate fails its first attempt
/// before any request is made.
fn admission_failure(
    record: ImageRecord,
    slot: &OutcomeSlot,
    aggregator: &ResultAggregator,
    error: &AcquireError,
) -> TransferOutcome {
    if let Err(e) = aggregator.transition(slot, RecordState::InFlight { attempt: 1 }) {
        warn!(error = %e, "record state transition rejected");
    }
    let failure = AttemptFailure::new(Phase::Prepare, StepError::Aborted(format!("admission gate: {error}")));
    TransferOutcome {
        record,
        status: failure.status(),
        attempts: 1,
        error_detail: Some(failure.error.to_string()),
        duration_ms: 0,
        staged_path: None,
        response_excerpt: None,
    }
}

/// Only absolute http(s) URLs can be downloaded.
fn parse_source_url(raw: &str) -> Result<Url, StepError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| StepError::InvalidRecord(format!("malformed source URL {raw:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(StepError::InvalidRecord(format!(
            "unsupported URL scheme {other:?} in {raw:?}"
        ))),
    }
}
