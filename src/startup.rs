use std::fmt::Debug;
use std::path::PathBuf;

use crate::configuration::get_configuration;
use crate::configuration::Cli;
use crate::configuration::ConfigurationError;
use crate::configuration::Settings;
use crate::configuration::NEWSLETTER_SECRET_VAR;
use crate::delivery::BatchFailure;
use crate::delivery::BatchUploader;
use crate::delivery::RetryPolicy;
use crate::delivery::Sleep;
use crate::delivery::TokioSleep;
use crate::import::read_subscribers_file;
use crate::upload_client::Destination;
use crate::upload_client::UploadClient;
use crate::upload_client::UploadError;
use crate::utils::error_chain_fmt;

/// Counts for a run that did not fail. `uploaded == valid` always holds here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub valid: usize,
    pub invalid: usize,
    pub uploaded: usize,
}

#[derive(thiserror::Error)]
pub enum RunError {
    #[error("Could not read subscribers")]
    Import(#[source] anyhow::Error),
    /// Batches before `batch_number` were committed and stay committed
    #[error("Batch {batch_number} failed: {error}")]
    BatchFailed {
        batch_number: usize,
        uploaded: usize,
        #[source]
        error: UploadError,
    },
}

impl Debug for RunError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// A fully configured import: nothing has been read or sent yet. Any
/// configuration problem surfaces in `build`, before the first request.
pub struct Application<S = TokioSleep> {
    csv: PathBuf,
    uploader: BatchUploader<S>,
}

impl Application<TokioSleep> {
    /// Resolve settings and destination from the CLI (and the process env)
    pub fn build(cli: &Cli) -> Result<Self, ConfigurationError> {
        let settings = get_configuration(cli)?;
        let destination = cli.destination(std::env::var(NEWSLETTER_SECRET_VAR).ok())?;
        Self::build_with(cli.csv.clone(), settings, destination)
    }

    pub fn build_with(
        csv: PathBuf,
        settings: Settings,
        destination: Destination,
    ) -> Result<Self, ConfigurationError> {
        tracing::info!(
            destination = destination.name(),
            batch_size = settings.upload.batch_size,
            max_retries = settings.upload.max_retries,
            source = %settings.upload.source,
            "configured import"
        );
        let timeout = settings.upload.timeout();
        let client = UploadClient::new(destination, settings.upload.source, timeout)
            .map_err(ConfigurationError::HttpClient)?;
        let uploader = BatchUploader::new(
            client,
            RetryPolicy::with_max_retries(settings.upload.max_retries),
            settings.upload.batch_size,
        );
        Ok(Self { csv, uploader })
    }
}

impl<S: Sleep> Application<S> {
    pub fn with_sleep<T: Sleep>(
        self,
        sleep: T,
    ) -> Application<T> {
        Application {
            csv: self.csv,
            uploader: self.uploader.with_sleep(sleep),
        }
    }

    /// Read the CSV, then upload what survived validation. Progress goes to
    /// stdout; an empty import sends nothing and is not an error.
    #[tracing::instrument(name = "Importing subscribers", skip(self), fields(csv = %self.csv.display()))]
    pub async fn run(self) -> Result<RunSummary, RunError> {
        let imported = read_subscribers_file(&self.csv).map_err(RunError::Import)?;
        let (valid, invalid) = (imported.records.len(), imported.invalid);

        if imported.is_empty() {
            println!("No valid rows found.");
            return Ok(RunSummary {
                valid,
                invalid,
                uploaded: 0,
            });
        }

        println!("Prepared {valid} unique valid emails (skipped invalid/blank: {invalid}).");

        let report = self
            .uploader
            .upload(&imported.records, |p| {
                println!("Inserted batch {}: {}/{}", p.batch_number, p.uploaded, p.total)
            })
            .await;

        match report.failure {
            Some(BatchFailure {
                batch_number,
                error,
            }) => Err(RunError::BatchFailed {
                batch_number,
                uploaded: report.uploaded,
                error,
            }),
            None => {
                println!("Done.");
                Ok(RunSummary {
                    valid,
                    invalid,
                    uploaded: report.uploaded,
                })
            }
        }
    }
}
