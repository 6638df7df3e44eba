use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::Config;
use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use serde_aux::field_attributes::deserialize_option_number_from_string;

use crate::delivery::DEFAULT_BATCH_SIZE;
use crate::delivery::DEFAULT_MAX_RETRIES;
use crate::upload_client::Destination;
use crate::utils::error_chain_fmt;

pub const DEFAULT_SOURCE: &str = "csv-import";

/// Keys read from the credentials file in REST mode
pub const SUPABASE_URL_KEY: &str = "VITE_SUPABASE_URL";
pub const SUPABASE_KEY_KEY: &str = "VITE_SUPABASE_PUBLISHABLE_KEY";

/// Fallback for `--newsletter-secret`
pub const NEWSLETTER_SECRET_VAR: &str = "NEWSLETTER_AUTOMATION_SECRET";

/// Import newsletter subscribers from a CSV export (Google Sheets or Resend)
///
/// By default rows are inserted directly through the REST API with the
/// publishable key (relying on the table's INSERT policy). With `--edge-url`,
/// they are sent to the import function instead.
#[derive(Parser, Debug, Clone)]
#[command(name = "subscriber-import", version)]
pub struct Cli {
    /// Path to the CSV file
    #[arg(long)]
    pub csv: PathBuf,

    /// Path to the file containing VITE_SUPABASE_URL and
    /// VITE_SUPABASE_PUBLISHABLE_KEY (REST mode only)
    #[arg(long, default_value = ".env")]
    pub env: PathBuf,

    /// Value for the `source` column [default: csv-import]
    #[arg(long)]
    pub source: Option<String>,

    /// Rows per request [default: 500]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch: Option<u64>,

    /// Retries per batch on transient failures [default: 6]
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Per-request timeout [default: 60 (REST), 90 (edge)]
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// If set, import via this function URL instead of the REST API, e.g.
    /// https://<ref>.supabase.co/functions/v1/import-resend-subscribers
    #[arg(long, default_value = "")]
    pub edge_url: String,

    /// Value for the x-newsletter-secret header (required with --edge-url)
    #[arg(long, default_value = "")]
    pub newsletter_secret: String,
}

/// Tunables for the upload, layered as: built-in defaults, then `IMPORT_*`
/// env vars, then CLI flags. See `get_configuration`.
#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    pub upload: UploadSettings,
}

#[derive(Deserialize, Debug, Clone)]
pub struct UploadSettings {
    pub source: String,

    // env vars are -always- parsed as String, hence `serde-aux`
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub batch_size: usize,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_retries: u32,

    /// Unset means the destination's default
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub timeout_secs: Option<u64>,
}

impl UploadSettings {
    pub fn timeout(&self) -> Option<Duration> { self.timeout_secs.map(Duration::from_secs) }
}

#[derive(thiserror::Error)]
pub enum ConfigurationError {
    #[error(
        "Missing VITE_SUPABASE_URL or VITE_SUPABASE_PUBLISHABLE_KEY in {}",
        .path.display()
    )]
    MissingRestCredentials { path: PathBuf },
    #[error(
        "--newsletter-secret (or env NEWSLETTER_AUTOMATION_SECRET) is required when using --edge-url"
    )]
    MissingNewsletterSecret,
    #[error("Batch size must be at least 1")]
    InvalidBatchSize,
    #[error("Invalid settings")]
    Settings(#[from] config::ConfigError),
    #[error("Could not build the HTTP client")]
    HttpClient(#[source] reqwest::Error),
}

impl Debug for ConfigurationError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// `IMPORT_*` variables, e.g. `IMPORT_UPLOAD__BATCH_SIZE=200` ->
/// `Settings.upload.batch_size`
fn import_env() -> config::Environment {
    config::Environment::with_prefix("IMPORT")
        .prefix_separator("_")
        .separator("__")
}

/// Merge defaults, `IMPORT_*` env vars and CLI flags into `Settings`; a flag
/// wins over the env var for the same setting
pub fn get_configuration(cli: &Cli) -> Result<Settings, ConfigurationError> {
    layer_settings(cli, import_env())
}

fn layer_settings(
    cli: &Cli,
    env: config::Environment,
) -> Result<Settings, ConfigurationError> {
    let settings = Config::builder()
        .set_default("upload.source", DEFAULT_SOURCE)?
        .set_default("upload.batch_size", DEFAULT_BATCH_SIZE as i64)?
        .set_default("upload.max_retries", i64::from(DEFAULT_MAX_RETRIES))?
        .add_source(env)
        .set_override_option("upload.source", cli.source.clone())?
        .set_override_option("upload.batch_size", cli.batch.map(|n| n as i64))?
        .set_override_option("upload.max_retries", cli.max_retries.map(i64::from))?
        .set_override_option("upload.timeout_secs", cli.timeout_secs.map(|n| n as i64))?
        .build()?
        .try_deserialize::<Settings>()?;

    if settings.upload.batch_size == 0 {
        return Err(ConfigurationError::InvalidBatchSize);
    }
    Ok(settings)
}

fn non_blank(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Read `KEY=VALUE` lines without touching the process environment. A missing
/// file yields no keys; malformed lines are skipped.
///
/// This is dotenv syntax, not a plain split on `=`: `#` starts a comment (also
/// after an unquoted value), `$VAR` is expanded unless single-quoted, and an
/// unquoted value containing spaces is malformed.
pub fn load_env_file(path: &Path) -> HashMap<String, String> {
    let lines = match dotenvy::from_path_iter(path) {
        Ok(lines) => lines,
        Err(e) => {
            tracing::warn!(error.message = %e, path = %path.display(), "could not read env file");
            return HashMap::new();
        }
    };
    lines
        .filter_map(|line| {
            line.map_err(|e| tracing::warn!(error.message = %e, "skipping malformed env line"))
                .ok()
        })
        .collect()
}

impl Cli {
    /// A non-blank `--edge-url` selects edge mode, which needs a secret (from
    /// `--newsletter-secret`, else `fallback_secret`). Otherwise the REST
    /// credentials must be present in the `--env` file.
    pub fn destination(
        &self,
        fallback_secret: Option<String>,
    ) -> Result<Destination, ConfigurationError> {
        if let Some(url) = non_blank(&self.edge_url) {
            let secret = non_blank(&self.newsletter_secret)
                .or_else(|| fallback_secret.as_deref().and_then(non_blank))
                .ok_or(ConfigurationError::MissingNewsletterSecret)?;
            return Ok(Destination::Edge {
                url,
                secret: Secret::new(secret),
            });
        }

        let vars = load_env_file(&self.env);
        let get = |key: &str| vars.get(key).and_then(|v| non_blank(v));
        match (get(SUPABASE_URL_KEY), get(SUPABASE_KEY_KEY)) {
            (Some(base_url), Some(api_key)) => Ok(Destination::Rest {
                base_url,
                api_key: Secret::new(api_key),
            }),
            _ => Err(ConfigurationError::MissingRestCredentials {
                path: self.env.clone(),
            }),
        }
    }
}
