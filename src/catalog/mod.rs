//! In-memory garment catalog.
//!
//! The index is loaded once, validated row by row, and never mutated
//! afterwards. Share it between threads behind an `Arc`.
//!
//! - `row`: CSV decoding and per-row validation
//! - `source`: primary/fallback sources and the load path

mod row;
mod source;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::Read;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use row::MalformedRow;
pub use source::{CatalogSource, LoadError, SourceError};

/// How many distinct categories/colors a summary lists.
const SUMMARY_SAMPLE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Gender {
    Men,
    Women,
    Boys,
    Girls,
    Unisex,
}

impl Gender {
    pub const ALL: [Gender; 5] = [
        Gender::Men,
        Gender::Women,
        Gender::Boys,
        Gender::Girls,
        Gender::Unisex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Men => "Men",
            Gender::Women => "Women",
            Gender::Boys => "Boys",
            Gender::Girls => "Girls",
            Gender::Unisex => "Unisex",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Gender::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown gender {s:?}"))
    }
}

/// A garment record with its precomputed embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: u64,
    pub name: String,
    pub category: String,
    pub gender: Gender,
    pub color: String,
    pub season: String,
    pub usage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,

    #[serde(default, skip_serializing)]
    pub embedding: Vec<f32>,
}

/// Restricts which entries a match considers.
///
/// An entry is in scope when its gender is the target gender or `Unisex`,
/// and its category differs from the excluded one (case-sensitive).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeFilter {
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub exclude_category: Option<String>,
}

impl ScopeFilter {
    pub fn matches(&self, entry: &CatalogEntry) -> bool {
        let gender_ok = match self.gender {
            Some(target) => entry.gender == target || entry.gender == Gender::Unisex,
            None => true,
        };

        let category_ok = match &self.exclude_category {
            Some(excluded) => entry.category != *excluded,
            None => true,
        };

        gender_ok && category_ok
    }
}

/// Catalog statistics, as printed by `outfit-match catalog`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSummary {
    pub origin: String,
    pub total: usize,
    pub skipped: usize,
    pub dimensions: usize,
    pub genders: BTreeMap<Gender, usize>,
    pub categories: Vec<String>,
    pub colors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    entries: Vec<CatalogEntry>,
    dimensions: usize,
    skipped: Vec<MalformedRow>,
    origin: String,
}

impl CatalogIndex {
    /// Load from the first source that succeeds (primary, then fallbacks).
    ///
    /// The index is only returned fully built; a failed load never leaves a
    /// partial index behind.
    pub fn load(sources: &[CatalogSource], timeout: Duration) -> Result<Self, LoadError> {
        source::load(sources, timeout)
    }

    /// Parse a CSV catalog. Malformed rows are skipped and kept in
    /// [`skipped`](Self::skipped).
    pub fn from_reader<R: Read>(reader: R, origin: &str) -> Result<Self, SourceError> {
        let (entries, dimensions, skipped) = row::read_csv(reader)?.finish();

        Ok(Self {
            entries,
            dimensions,
            skipped,
            origin: origin.to_string(),
        })
    }

    /// Build an index from already-typed entries, applying the same
    /// uniqueness and dimensionality checks as a CSV load.
    pub fn from_entries(entries: Vec<CatalogEntry>, origin: &str) -> Self {
        let mut builder = row::IndexBuilder::default();
        for (idx, entry) in entries.into_iter().enumerate() {
            builder.push(idx + 1, Ok(entry));
        }
        let (entries, dimensions, skipped) = builder.finish();

        Self {
            entries,
            dimensions,
            skipped,
            origin: origin.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding dimensionality shared by every entry (0 when empty).
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn skipped(&self) -> &[MalformedRow] {
        &self.skipped
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    #[cfg(test)]
    pub fn get(&self, id: u64) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entries matching `predicate`, in catalog order.
    pub fn filter<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a CatalogEntry> + 'a
    where
        P: Fn(&CatalogEntry) -> bool + 'a,
    {
        self.entries.iter().filter(move |e| predicate(e))
    }

    pub fn scoped<'a>(&'a self, scope: &'a ScopeFilter) -> impl Iterator<Item = &'a CatalogEntry> + 'a {
        self.filter(move |e| scope.matches(e))
    }

    /// Distinct categories in first-seen order.
    pub fn categories(&self) -> Vec<String> {
        distinct(self.entries.iter().map(|e| e.category.as_str()))
    }

    pub fn summary(&self) -> CatalogSummary {
        let mut genders = BTreeMap::new();
        for entry in &self.entries {
            *genders.entry(entry.gender).or_insert(0) += 1;
        }

        let mut categories = self.categories();
        categories.truncate(SUMMARY_SAMPLE);

        let mut colors = distinct(
            self.entries
                .iter()
                .map(|e| e.color.as_str())
                .filter(|c| !c.is_empty()),
        );
        colors.truncate(SUMMARY_SAMPLE);

        CatalogSummary {
            origin: self.origin.clone(),
            total: self.entries.len(),
            skipped: self.skipped.len(),
            dimensions: self.dimensions,
            genders,
            categories,
            colors,
        }
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|v| seen.insert(*v))
        .map(|v| v.to_string())
        .collect()
}
