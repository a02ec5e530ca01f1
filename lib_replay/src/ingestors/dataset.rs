//! # Delimited Dataset Loader
//!
//! Reads the recorded page samples from a delimited text file. The first line is
//! the header; every column is mapped to a record field by header name, so
//! column order does not matter and unknown columns are ignored.
//!
//! Splitting is deliberately naive (no quoting rules). Cells are trimmed;
//! numeric cells are parsed as floating point and truncated for integer fields,
//! which accepts spreadsheet exports such as `12.0`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::models::{ColumnSource, PageSample};
use crate::utils::local_now;

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported dataset format: {0} (expected .csv or .tsv)")]
    UnsupportedFormat(String),
    #[error("failed to read dataset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to fetch dataset {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("fetching dataset {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("dataset has no header row")]
    MissingHeader,
}

/// Cell separator, chosen from the location's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Comma,
    Tab,
}

impl Delimiter {
    /// Picks the delimiter from the file name or object key of `location`.
    /// Query strings and fragments of URLs are ignored.
    pub fn from_location(location: &str) -> Result<Self, IngestError> {
        let path = location
            .split(|c: char| c == '?' || c == '#')
            .next()
            .unwrap_or(location);
        let extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("csv") => Ok(Delimiter::Comma),
            Some("tsv") => Ok(Delimiter::Tab),
            _ => Err(IngestError::UnsupportedFormat(location.to_string())),
        }
    }

    fn as_char(&self) -> char {
        match self {
            Delimiter::Comma => ',',
            Delimiter::Tab => '\t',
        }
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// # Load All
///
/// Loads every record from `location`, a local path or an `http(s)://` URL.
pub async fn load_all(location: &str) -> Result<Vec<PageSample>, IngestError> {
    let delimiter = Delimiter::from_location(location)?;
    let text = if is_remote(location) {
        fetch(location).await?
    } else {
        tokio::fs::read_to_string(location)
            .await
            .map_err(|source| IngestError::Io {
                path: location.to_string(),
                source,
            })?
    };

    let samples = parse_delimited(&text, delimiter)?;
    info!(location, records = samples.len(), "Dataset loaded");
    Ok(samples)
}

async fn fetch(url: &str) -> Result<String, IngestError> {
    let http_err = |source: reqwest::Error| IngestError::Http {
        url: url.to_string(),
        source,
    };
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(http_err)?;
    let response = client.get(url).send().await.map_err(http_err)?;
    let status = response.status();
    if !status.is_success() {
        return Err(IngestError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    response.text().await.map_err(http_err)
}

/// Parses delimited `text` into records.
///
/// Blank lines are ignored. A row with more cells than there are headers is
/// skipped as malformed; a row with fewer leaves the missing fields at their
/// defaults. `created_at` is stamped with the load time.
pub fn parse_delimited(text: &str, delimiter: Delimiter) -> Result<Vec<PageSample>, IngestError> {
    let separator = delimiter.as_char();
    let mut lines = text.lines().enumerate();

    let header_line = lines
        .by_ref()
        .find(|(_, line)| !line.trim().is_empty())
        .map(|(_, line)| line)
        .ok_or(IngestError::MissingHeader)?;
    let headers: HashMap<String, usize> = header_line
        .trim_start_matches('\u{feff}')
        .split(separator)
        .enumerate()
        .map(|(idx, name)| (clean(name).to_string(), idx))
        .collect();
    let width = header_line.split(separator).count();
    info!(columns = width, "Dataset header mapped");

    let loaded_at = local_now();
    let mut samples = Vec::new();
    let mut skipped = 0usize;
    for (idx, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let cells: Vec<&str> = line.split(separator).map(clean).collect();
        if cells.len() > width {
            warn!(
                line = idx + 1,
                cells = cells.len(),
                columns = width,
                "Malformed row skipped"
            );
            skipped += 1;
            continue;
        }
        let row = DelimitedRow {
            headers: &headers,
            cells,
            line: idx + 1,
        };
        let mut sample = PageSample::from_columns(&row);
        sample.created_at = Some(loaded_at);
        samples.push(sample);
    }

    if skipped > 0 {
        warn!(skipped, "Some dataset rows were skipped");
    }
    Ok(samples)
}

fn clean(cell: &str) -> &str {
    cell.trim().trim_matches('"')
}

/// One data line, addressed through the header map.
struct DelimitedRow<'a> {
    headers: &'a HashMap<String, usize>,
    cells: Vec<&'a str>,
    line: usize,
}

impl DelimitedRow<'_> {
    fn raw(&self, column: &str) -> &str {
        self.headers
            .get(column)
            .and_then(|&idx| self.cells.get(idx))
            .copied()
            .unwrap_or("")
    }

    fn number(&self, column: &str) -> f64 {
        let value = self.raw(column);
        if value.is_empty() {
            return 0.0;
        }
        match value.parse::<f64>() {
            Ok(n) if n.is_finite() => n,
            _ => {
                warn!(line = self.line, column, value, "Unparsable numeric cell; using 0");
                0.0
            }
        }
    }
}

impl ColumnSource for DelimitedRow<'_> {
    fn text(&self, column: &str) -> String {
        self.raw(column).to_string()
    }

    fn int(&self, column: &str) -> i32 {
        self.number(column) as i32
    }

    fn long(&self, column: &str) -> i64 {
        self.number(column) as i64
    }

    fn double(&self, column: &str) -> f64 {
        self.number(column)
    }
}
