use std::future::Future;
use std::slice::Chunks;
use std::time::Duration;

use crate::domain::SubscriberRecord;
use crate::upload_client::UploadClient;
use crate::upload_client::UploadError;

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_MAX_RETRIES: u32 = 6;

/// How many times a batch is retried, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// A batch gets at most `max_retries + 1` requests
    pub max_retries: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Wait before retry number `attempt` (0-indexed): `2^attempt + 0.5`
    /// seconds, capped at `max_delay`.
    ///
    /// 1.5s, 2.5s, 4.5s, 8.5s, 16.5s, 30s, 30s, ...
    pub fn delay(
        &self,
        attempt: u32,
    ) -> Duration {
        // anything past 2^16 is capped anyway; this just keeps `powi` sane
        let secs = 2f64.powi(attempt.min(16) as i32) + 0.5;
        Duration::from_secs_f64(secs).min(self.max_delay)
    }
}

/// Backoff delays go through this trait, so that tests can observe the
/// schedule without actually waiting for it.
pub trait Sleep {
    fn sleep(
        &self,
        duration: Duration,
    ) -> impl Future<Output = ()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleep;

impl Sleep for TokioSleep {
    fn sleep(
        &self,
        duration: Duration,
    ) -> impl Future<Output = ()> {
        tokio::time::sleep(duration)
    }
}

/// Reported after each batch that was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// 1-indexed
    pub batch_number: usize,
    /// Records accepted so far, this batch included
    pub uploaded: usize,
    pub total: usize,
}

#[derive(Debug)]
pub struct BatchFailure {
    /// 1-indexed
    pub batch_number: usize,
    pub error: UploadError,
}

/// Batches before `failure` (if any) were committed; batches after it were
/// never attempted.
#[derive(Debug)]
pub struct UploadReport {
    pub uploaded: usize,
    pub failure: Option<BatchFailure>,
}

impl UploadReport {
    pub fn is_success(&self) -> bool { self.failure.is_none() }
}

/// Sends records in fixed-size batches, one request at a time, stopping at the
/// first batch that cannot be delivered. A batch either lands entirely or not
/// at all; nothing is rolled back.
pub struct BatchUploader<S = TokioSleep> {
    client: UploadClient,
    retry: RetryPolicy,
    batch_size: usize,
    sleep: S,
}

impl BatchUploader<TokioSleep> {
    pub fn new(
        client: UploadClient,
        retry: RetryPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            retry,
            batch_size: batch_size.max(1),
            sleep: TokioSleep,
        }
    }
}

impl<S: Sleep> BatchUploader<S> {
    pub fn with_sleep<T: Sleep>(
        self,
        sleep: T,
    ) -> BatchUploader<T> {
        BatchUploader {
            client: self.client,
            retry: self.retry,
            batch_size: self.batch_size,
            sleep,
        }
    }

    /// Contiguous, non-overlapping, in order; only the last may be short
    pub fn batches<'r>(
        &self,
        records: &'r [SubscriberRecord],
    ) -> Chunks<'r, SubscriberRecord> {
        records.chunks(self.batch_size)
    }

    pub async fn upload(
        &self,
        records: &[SubscriberRecord],
        mut on_progress: impl FnMut(&BatchProgress),
    ) -> UploadReport {
        let total = records.len();
        let mut uploaded = 0;

        for (i, batch) in self.batches(records).enumerate() {
            let batch_number = i + 1;
            if let Err(error) = self.upload_batch(batch_number, batch).await {
                return UploadReport {
                    uploaded,
                    failure: Some(BatchFailure {
                        batch_number,
                        error,
                    }),
                };
            }
            uploaded += batch.len();
            tracing::info!(batch_number, uploaded, total, "batch accepted");
            on_progress(&BatchProgress {
                batch_number,
                uploaded,
                total,
            });
        }

        UploadReport {
            uploaded,
            failure: None,
        }
    }

    /// One logical upload of `batch`: up to `max_retries + 1` requests. Only
    /// network errors and the destination's transient statuses are retried.
    #[tracing::instrument(
        name = "Uploading batch",
        skip(self, batch),
        fields(
            destination = self.client.destination().name(),
            batch_size = batch.len(),
        )
    )]
    pub async fn upload_batch(
        &self,
        batch_number: usize,
        batch: &[SubscriberRecord],
    ) -> Result<(), UploadError> {
        let mut attempt = 0;
        loop {
            match self.client.send_batch(batch).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        error.message = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    self.sleep.sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        error.cause_chain = ?e,
                        error.message = %e,
                        attempts = attempt + 1,
                        "giving up on batch"
                    );
                    return Err(e);
                }
            }
        }
    }
}
