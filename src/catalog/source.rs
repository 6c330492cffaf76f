//! Catalog sources and the fallback load path.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use url::Url;

use super::CatalogIndex;

/// Where a catalog CSV lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    Remote(Url),
    Local(PathBuf),
}

impl CatalogSource {
    /// `http(s)://` locations are remote, anything else is a file path.
    pub fn parse(location: &str) -> Self {
        match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => CatalogSource::Remote(url),
            _ => CatalogSource::Local(PathBuf::from(location)),
        }
    }
}

impl fmt::Display for CatalogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogSource::Remote(url) => write!(f, "{url}"),
            CatalogSource::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Why a single source could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("catalog is missing columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

#[derive(Debug)]
pub struct SourceFailure {
    pub origin: String,
    pub error: SourceError,
}

/// The catalog could not be loaded from any configured source.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no catalog sources configured")]
    NoSources,

    #[error("could not load catalog from any source: {}", describe(.0))]
    Exhausted(Vec<SourceFailure>),
}

fn describe(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.origin, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Load from a single source. A remote fetch is bounded by `timeout`.
pub fn fetch(source: &CatalogSource, timeout: Duration) -> Result<CatalogIndex, SourceError> {
    let origin = source.to_string();
    match source {
        CatalogSource::Remote(url) => {
            let client = reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()?;
            let body = client.get(url.clone()).send()?.error_for_status()?.bytes()?;
            CatalogIndex::from_reader(body.as_ref(), &origin)
        }
        CatalogSource::Local(path) => {
            let file = File::open(path)?;
            CatalogIndex::from_reader(BufReader::new(file), &origin)
        }
    }
}

/// Try each source in order, returning the first index that loads.
///
/// Earlier failures are logged and recovered; only exhausting every source
/// is an error.
pub fn load(sources: &[CatalogSource], timeout: Duration) -> Result<CatalogIndex, LoadError> {
    let mut failures = vec![];

    for source in sources {
        log::info!("Loading catalog from {source}");
        let now = Instant::now();

        match fetch(source, timeout) {
            Ok(index) => {
                log::info!(
                    "Loaded {} items ({} rows skipped, {} dims) from {source} in {:?}",
                    index.len(),
                    index.skipped().len(),
                    index.dimensions(),
                    now.elapsed()
                );
                return Ok(index);
            }
            Err(error) => {
                log::warn!("Catalog load from {source} failed: {error}");
                failures.push(SourceFailure {
                    origin: source.to_string(),
                    error,
                });
            }
        }
    }

    if failures.is_empty() {
        return Err(LoadError::NoSources);
    }

    let err = LoadError::Exhausted(failures);
    log::error!("{err}");
    Err(err)
}
