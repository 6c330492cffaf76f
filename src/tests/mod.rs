//! Scenario tests across modules.
//!
//! Everything here runs offline: providers are stubs implementing
//! [`EmbeddingProvider`] and catalogs are written to temp dirs.


use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::catalog::{CatalogEntry, Gender};
use crate::semantic::{EmbeddingError, EmbeddingProvider};

/// Returns a fixed vector per text and counts calls. Unknown texts fail.
pub struct StubProvider {
    vectors: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl StubProvider {
    pub fn new(vectors: &[(&str, &[f32])]) -> Self {
        Self {
            vectors: vectors
                .iter()
                .map(|(text, v)| (text.to_string(), v.to_vec()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed(format!("no stub vector for {text:?}")))
    }
}

pub fn entry(id: u64, category: &str, gender: Gender, embedding: &[f32]) -> CatalogEntry {
    CatalogEntry {
        id,
        name: format!("{gender} {category} {id}"),
        category: category.to_string(),
        gender,
        color: "Black".to_string(),
        season: "Summer".to_string(),
        usage: "Casual".to_string(),
        master_category: Some("Apparel".to_string()),
        sub_category: None,
        year: Some("2012".to_string()),
        embedding: embedding.to_vec(),
    }
}

pub const CSV_HEADER: &str =
    "id,gender,masterCategory,subCategory,articleType,baseColour,season,year,usage,productDisplayName,embeddings";

/// One well-formed catalog CSV line.
pub fn csv_row(id: u64, gender: &str, category: &str, name: &str, embedding: &[f32]) -> String {
    let embedding = serde_json::to_string(embedding).unwrap();
    format!("{id},{gender},Apparel,Topwear,{category},Black,Summer,2012,Casual,{name},\"{embedding}\"")
}
