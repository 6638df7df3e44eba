use std::time::Duration;

use reqwest::Client;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Serialize;

use crate::domain::SubscriberRecord;
use crate::utils::truncate;

/// Response bodies quoted in diagnostics are cut to this many characters
pub const MAX_DIAGNOSTIC_CHARS: usize = 500;

/// Where batches are sent, and how. The two backends disagree slightly on
/// which statuses mean "accepted" and "try again".
#[derive(Debug)]
pub enum Destination {
    /// PostgREST insert into `newsletter_subscribers`, with an API key. Relies
    /// on the table's INSERT policy.
    Rest {
        base_url: String,
        api_key: Secret<String>,
    },
    /// Backend function that imports contacts with elevated privileges
    /// (bypassing row-level security), authenticated with a shared secret.
    Edge {
        url: String,
        secret: Secret<String>,
    },
}

impl Destination {
    pub fn name(&self) -> &'static str {
        match self {
            Destination::Rest { .. } => "rest",
            Destination::Edge { .. } => "edge",
        }
    }

    /// 201 is typical for PostgREST, but 200 and 204 (`return=minimal`) also
    /// occur
    pub fn is_success(
        &self,
        status: StatusCode,
    ) -> bool {
        match self {
            Destination::Rest { .. } => matches!(status.as_u16(), 200 | 201 | 204),
            Destination::Edge { .. } => matches!(status.as_u16(), 200 | 201),
        }
    }

    /// Rate limits and transient server errors. 409 only counts for PostgREST.
    pub fn is_retryable(
        &self,
        status: StatusCode,
    ) -> bool {
        match self {
            Destination::Rest { .. } => {
                matches!(status.as_u16(), 408 | 409 | 425 | 429 | 500 | 502 | 503 | 504)
            }
            Destination::Edge { .. } => {
                matches!(status.as_u16(), 408 | 425 | 429 | 500 | 502 | 503 | 504)
            }
        }
    }

    pub fn default_timeout(&self) -> Duration {
        match self {
            Destination::Rest { .. } => Duration::from_secs(60),
            Destination::Edge { .. } => Duration::from_secs(90),
        }
    }
}

/// Failure of a single physical attempt. `Display` is the diagnostic shown to
/// the user when a batch is abandoned.
#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    #[error("HTTP {status}: {body}")]
    Status {
        status: u16,
        body: String,
        retryable: bool,
    },
    /// A non-error status outside the success set, e.g. 202
    #[error("Unexpected status {status}")]
    UnexpectedStatus { status: u16 },
    #[error("Unexpected status {status}: {body}")]
    UnexpectedResponse { status: u16, body: String },
    /// Connection refused, timeout, broken body, ... always worth retrying
    #[error(transparent)]
    Network(#[from] reqwest::Error),
}

impl UploadError {
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Status { retryable, .. } => *retryable,
            UploadError::UnexpectedStatus { .. } | UploadError::UnexpectedResponse { .. } => false,
            UploadError::Network(_) => true,
        }
    }
}

#[derive(Serialize)]
struct RestRow<'a> {
    email: &'a str,
    name: Option<&'a str>,
    source: &'a str,
    is_active: bool,
}

#[derive(Serialize)]
struct EdgeContact<'a> {
    email: &'a str,
    first_name: Option<&'a str>,
    last_name: Option<&'a str>,
    name: Option<&'a str>,
    unsubscribed: bool,
}

#[derive(Serialize)]
struct EdgeImportRequest<'a> {
    contacts: Vec<EdgeContact<'a>>,
    source: &'a str,
}

// one `Client` for the whole run, so the connection is reused across batches
// and retries
pub struct UploadClient {
    http_client: Client,
    destination: Destination,
    source: String,
}

impl UploadClient {
    /// `timeout` applies per request; `None` uses the destination's default
    pub fn new(
        destination: Destination,
        source: String,
        timeout: Option<Duration>,
    ) -> Result<Self, reqwest::Error> {
        let timeout = timeout.unwrap_or_else(|| destination.default_timeout());
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http_client,
            destination,
            source,
        })
    }

    pub fn destination(&self) -> &Destination { &self.destination }

    /// Make exactly one request for `batch`. Retrying is the caller's job.
    pub async fn send_batch(
        &self,
        batch: &[SubscriberRecord],
    ) -> Result<(), UploadError> {
        let request = match &self.destination {
            Destination::Rest { base_url, api_key } => {
                let rows: Vec<RestRow> = batch
                    .iter()
                    .map(|r| RestRow {
                        email: r.email.as_ref(),
                        name: r.name.full(),
                        source: &self.source,
                        is_active: r.is_active(),
                    })
                    .collect();
                self.http_client
                    .post(format!(
                        "{}/rest/v1/newsletter_subscribers?on_conflict=email",
                        base_url.trim_end_matches('/')
                    ))
                    .header("apikey", api_key.expose_secret())
                    .bearer_auth(api_key.expose_secret())
                    .header("Prefer", "resolution=ignore-duplicates,return=minimal")
                    .json(&rows)
            }
            Destination::Edge { url, secret } => {
                let contacts = batch
                    .iter()
                    .map(|r| EdgeContact {
                        email: r.email.as_ref(),
                        first_name: r.name.first(),
                        last_name: r.name.last(),
                        name: r.name.full(),
                        unsubscribed: !r.is_active(),
                    })
                    .collect();
                self.http_client
                    .post(url)
                    .header("x-newsletter-secret", secret.expose_secret())
                    .json(&EdgeImportRequest {
                        contacts,
                        source: &self.source,
                    })
            }
        };

        let response = request.send().await?;
        let status = response.status();
        tracing::debug!(status = status.as_u16(), "received response");

        if self.destination.is_success(status) {
            return Ok(());
        }

        // a body that can't be read is not worth failing over; the status is
        // what matters
        let body = truncate(
            &response.text().await.unwrap_or_default(),
            MAX_DIAGNOSTIC_CHARS,
        );

        Err(
            match (status.is_client_error() || status.is_server_error(), &self.destination) {
                (true, _) => UploadError::Status {
                    status: status.as_u16(),
                    body,
                    retryable: self.destination.is_retryable(status),
                },
                (false, Destination::Rest { .. }) => UploadError::UnexpectedStatus {
                    status: status.as_u16(),
                },
                (false, Destination::Edge { .. }) => UploadError::UnexpectedResponse {
                    status: status.as_u16(),
                    body,
                },
            },
        )
    }
}
