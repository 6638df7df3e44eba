use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use csv::ReaderBuilder;
use csv::StringRecord;
use csv::Trim;

use crate::domain::SubscriberEmail;
use crate::domain::SubscriberName;
use crate::domain::SubscriberRecord;
use crate::domain::Subscription;

// two export formats are in use:
// - Google Sheet export: `Email`, `First Name`, `Last Name`
// - Resend contact export: `email`, `first_name`, `last_name`, `unsubscribed`
//
// headers are compared after `normalize_header`, so only one spelling is needed
// per field
const EMAIL: &str = "email";
const FIRST_NAME: &str = "first_name";
const LAST_NAME: &str = "last_name";
const UNSUBSCRIBED: &str = "unsubscribed";

/// The outcome of reading a CSV export: unique valid records in file order,
/// and the number of rows rejected for a blank or malformed email.
///
/// Duplicates are dropped silently and are -not- counted in `invalid`.
#[derive(Debug, Default)]
pub struct ImportedSubscribers {
    pub records: Vec<SubscriberRecord>,
    pub invalid: usize,
}

impl ImportedSubscribers {
    pub fn is_empty(&self) -> bool { self.records.is_empty() }
}

/// `"First Name"`, `"first_name"` and `"\u{feff}First_Name"` all normalize to
/// `"first_name"`
fn normalize_header(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .replace(' ', "_")
}

/// Column indices for each recognized field. A field may appear under more
/// than one header (e.g. both `Email` and `email`); the first column with a
/// non-blank value wins.
struct Columns {
    email: Vec<usize>,
    first_name: Vec<usize>,
    last_name: Vec<usize>,
    unsubscribed: Vec<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Self {
        let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
        let find = |field: &str| -> Vec<usize> {
            normalized
                .iter()
                .enumerate()
                .filter(|(_, h)| *h == field)
                .map(|(i, _)| i)
                .collect()
        };
        Self {
            email: find(EMAIL),
            first_name: find(FIRST_NAME),
            last_name: find(LAST_NAME),
            unsubscribed: find(UNSUBSCRIBED),
        }
    }
}

/// First non-blank cell among `columns`, trimmed. Missing cells (ragged rows)
/// read as blank.
fn cell<'r>(
    record: &'r StringRecord,
    columns: &[usize],
) -> &'r str {
    columns
        .iter()
        .filter_map(|&i| record.get(i))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .unwrap_or("")
}

#[tracing::instrument(name = "Reading subscribers from CSV", skip_all, fields(path = %path.display()))]
pub fn read_subscribers_file(path: &Path) -> Result<ImportedSubscribers, anyhow::Error> {
    let file = File::open(path).with_context(|| format!("could not open {}", path.display()))?;
    read_subscribers(file)
}

/// Parse, validate and deduplicate subscriber rows. Fails only if the CSV
/// itself cannot be read; bad rows are counted, not raised.
pub fn read_subscribers<R: Read>(reader: R) -> Result<ImportedSubscribers, anyhow::Error> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true) // rows may be shorter than the header
        .from_reader(reader);

    let columns = Columns::from_headers(reader.headers().context("could not read CSV header")?);
    if columns.email.is_empty() {
        tracing::warn!("no email column found; every row will be skipped");
    }

    let mut imported = ImportedSubscribers::default();
    let mut seen: HashSet<SubscriberEmail> = HashSet::new();

    for (i, row) in reader.records().enumerate() {
        // header is line 1
        let line = i + 2;
        let row = row.with_context(|| format!("could not read CSV line {line}"))?;

        let raw_email = cell(&row, &columns.email);
        if raw_email.is_empty() {
            tracing::debug!(line, "skipping blank email");
            imported.invalid += 1;
            continue;
        }

        let email = match SubscriberEmail::parse(raw_email) {
            Ok(email) => email,
            Err(e) => {
                tracing::debug!(line, error = %e, "skipping invalid email");
                imported.invalid += 1;
                continue;
            }
        };

        if !seen.insert(email.clone()) {
            tracing::debug!(line, %email, "skipping duplicate email");
            continue;
        }

        imported.records.push(SubscriberRecord {
            email,
            name: SubscriberName::parse(
                cell(&row, &columns.first_name),
                cell(&row, &columns.last_name),
            ),
            subscription: Subscription::from_unsubscribed_flag(cell(&row, &columns.unsubscribed)),
        });
    }

    tracing::info!(
        valid = imported.records.len(),
        invalid = imported.invalid,
        "finished reading subscribers"
    );
    Ok(imported)
}
