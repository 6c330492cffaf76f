//! CSV row decoding and validation.
//!
//! Rows are deserialized into a loosely-typed [`RawRow`] and then validated
//! into a [`CatalogEntry`]. Rows that fail are recorded, not fatal.

use std::collections::HashSet;
use std::io::Read;

use serde::{Deserialize, Serialize};

use super::source::SourceError;
use super::{CatalogEntry, Gender};

/// Columns without which no row can be turned into an entry.
pub const REQUIRED_COLUMNS: [&str; 4] = ["id", "gender", "articleType", "embeddings"];

/// A catalog row that was excluded from the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("row {row}: {reason}")]
pub struct MalformedRow {
    /// 1-based data row number (header excluded).
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    id: String,
    gender: String,
    #[serde(rename = "masterCategory", default)]
    master_category: Option<String>,
    #[serde(rename = "subCategory", default)]
    sub_category: Option<String>,
    #[serde(rename = "articleType")]
    article_type: String,
    #[serde(rename = "baseColour", default)]
    base_colour: Option<String>,
    #[serde(default)]
    season: Option<String>,
    #[serde(default)]
    year: Option<String>,
    #[serde(default)]
    usage: Option<String>,
    #[serde(rename = "productDisplayName", default)]
    product_display_name: Option<String>,
    embeddings: String,
}

impl RawRow {
    fn into_entry(self) -> Result<CatalogEntry, String> {
        let id = self
            .id
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("invalid id {:?}", self.id))?;

        let gender = self.gender.parse::<Gender>()?;

        let category = self.article_type.trim().to_string();
        if category.is_empty() {
            return Err("empty articleType".to_string());
        }

        let embedding = parse_embedding(&self.embeddings)?;

        Ok(CatalogEntry {
            id,
            name: text(self.product_display_name),
            category,
            gender,
            color: text(self.base_colour),
            season: text(self.season),
            usage: text(self.usage),
            master_category: self.master_category.map(|s| s.trim().to_string()),
            sub_category: self.sub_category.map(|s| s.trim().to_string()),
            year: self.year.map(|s| s.trim().to_string()),
            embedding,
        })
    }
}

fn text(value: Option<String>) -> String {
    value.map(|s| s.trim().to_string()).unwrap_or_default()
}

/// Decode the textual embedding column (`[0.1, -0.2, ...]`).
pub fn parse_embedding(raw: &str) -> Result<Vec<f32>, String> {
    let embedding: Vec<f32> = serde_json::from_str(raw.trim())
        .map_err(|e| format!("embedding is not a numeric list: {e}"))?;

    if embedding.is_empty() {
        return Err("embedding is empty".to_string());
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err("embedding contains non-finite values".to_string());
    }

    Ok(embedding)
}

/// Accumulates validated entries, enforcing unique ids and uniform
/// dimensionality (fixed by the first accepted entry).
#[derive(Debug, Default)]
pub(super) struct IndexBuilder {
    entries: Vec<CatalogEntry>,
    ids: HashSet<u64>,
    dimensions: Option<usize>,
    skipped: Vec<MalformedRow>,
}

impl IndexBuilder {
    pub(super) fn push(&mut self, row: usize, entry: Result<CatalogEntry, String>) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(reason) => return self.skip(row, reason),
        };

        if entry.embedding.is_empty() {
            return self.skip(row, "embedding is empty".to_string());
        }

        match self.dimensions {
            Some(dims) if dims != entry.embedding.len() => {
                return self.skip(
                    row,
                    format!(
                        "embedding has {} dimensions, catalog has {}",
                        entry.embedding.len(),
                        dims
                    ),
                );
            }
            _ => {}
        }

        if !self.ids.insert(entry.id) {
            return self.skip(row, format!("duplicate id {}", entry.id));
        }

        self.dimensions.get_or_insert(entry.embedding.len());
        self.entries.push(entry);
    }

    fn skip(&mut self, row: usize, reason: String) {
        log::debug!("Skipping catalog row {row}: {reason}");
        self.skipped.push(MalformedRow { row, reason });
    }

    pub(super) fn finish(self) -> (Vec<CatalogEntry>, usize, Vec<MalformedRow>) {
        (self.entries, self.dimensions.unwrap_or(0), self.skipped)
    }
}

/// Read every record from a CSV source.
///
/// Errors only when the header is unreadable or lacks required columns;
/// bad records land in the builder's skipped list.
pub(super) fn read_csv<R: Read>(reader: R) -> Result<IndexBuilder, SourceError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h.trim() == **col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SourceError::MissingColumns(missing));
    }

    let mut builder = IndexBuilder::default();
    for (idx, record) in csv_reader.records().enumerate() {
        let row = idx + 1;
        let entry = record
            .map_err(|e| format!("unreadable record: {e}"))
            .and_then(|record| {
                record
                    .deserialize::<RawRow>(Some(&headers))
                    .map_err(|e| format!("unexpected row shape: {e}"))
            })
            .and_then(RawRow::into_entry);
        builder.push(row, entry);
    }

    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "id,gender,masterCategory,subCategory,articleType,baseColour,season,year,usage,productDisplayName,embeddings\n";

    fn read(body: &str) -> (Vec<CatalogEntry>, usize, Vec<MalformedRow>) {
        read_csv(format!("{HEADER}{body}").as_bytes())
            .unwrap()
            .finish()
    }

    #[test]
    fn test_parse_embedding() {
        assert_eq!(parse_embedding("[1, 0.5, -2e-3]").unwrap(), vec![1.0, 0.5, -0.002]);
        assert_eq!(parse_embedding("  [0.25]  ").unwrap(), vec![0.25]);
        assert!(parse_embedding("[]").is_err());
        assert!(parse_embedding("[0.1, nan]").is_err());
        assert!(parse_embedding("0.1, 0.2").is_err());
        assert!(parse_embedding("['a']").is_err());
    }

    #[test]
    fn test_full_row() {
        let (entries, dims, skipped) = read(
            "15970,Men,Apparel,Topwear,Shirts,Navy Blue,Fall,2011,Casual,Turtle Check Men Navy Blue Shirt,\"[0.1, 0.2, 0.3]\"\n",
        );
        assert!(skipped.is_empty());
        assert_eq!(dims, 3);

        let entry = &entries[0];
        assert_eq!(entry.id, 15970);
        assert_eq!(entry.gender, Gender::Men);
        assert_eq!(entry.category, "Shirts");
        assert_eq!(entry.color, "Navy Blue");
        assert_eq!(entry.season, "Fall");
        assert_eq!(entry.usage, "Casual");
        assert_eq!(entry.name, "Turtle Check Men Navy Blue Shirt");
        assert_eq!(entry.master_category.as_deref(), Some("Apparel"));
        assert_eq!(entry.sub_category.as_deref(), Some("Topwear"));
        assert_eq!(entry.year.as_deref(), Some("2011"));
    }

    #[test]
    fn test_optional_columns_may_be_absent() {
        let builder = read_csv("id,gender,articleType,embeddings\n7,Unisex,Caps,\"[1.0]\"\n".as_bytes())
            .unwrap();
        let (entries, _, skipped) = builder.finish();
        assert!(skipped.is_empty());
        assert_eq!(entries[0].name, "");
        assert_eq!(entries[0].master_category, None);
    }

    #[test]
    fn test_missing_required_column_fails() {
        let result = read_csv("id,gender,embeddings\n1,Men,\"[1.0]\"\n".as_bytes());
        match result {
            Err(SourceError::MissingColumns(cols)) => assert_eq!(cols, vec!["articleType"]),
            other => panic!("expected missing columns, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let (entries, dims, skipped) = read(concat!(
            "1,Men,Apparel,Topwear,Shirts,Blue,Fall,2011,Casual,Shirt,\"[1.0, 0.0]\"\n",
            "abc,Men,Apparel,Topwear,Shirts,Blue,Fall,2011,Casual,Bad id,\"[1.0, 0.0]\"\n",
            "3,Robots,Apparel,Topwear,Shirts,Blue,Fall,2011,Casual,Bad gender,\"[1.0, 0.0]\"\n",
            "4,Women,Apparel,Topwear,Tops,Red,Summer,2012,Casual,Bad embedding,\"not a list\"\n",
            "5,Women,Apparel,Topwear,Tops,Red,Summer,2012,Casual,Wrong dims,\"[1.0, 0.0, 0.0]\"\n",
            "1,Women,Apparel,Topwear,Tops,Red,Summer,2012,Casual,Duplicate,\"[0.0, 1.0]\"\n",
            "7,Women,Apparel\n",
            "8,Women,Footwear,Shoes,Heels,Black,Winter,2012,Party,Heels,\"[0.0, 1.0]\"\n",
        ));

        assert_eq!(dims, 2);
        assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 8]);
        assert_eq!(
            skipped.iter().map(|s| s.row).collect::<Vec<_>>(),
            vec![2, 3, 4, 5, 6, 7]
        );
        assert!(skipped[4].reason.contains("duplicate id 1"));
    }
}
