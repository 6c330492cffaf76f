//! Ranking and merging of catalog entries against free-text descriptions.
//!
//! For each description, in input order: embed it, score every candidate by
//! cosine similarity, keep the top `top_n` (ties keep candidate order), and
//! append them to the result unless an earlier description already did.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogEntry;
use crate::semantic::cost::{CostModel, EmbeddingUsage};
use crate::semantic::embeddings::{validate_embedding, EmbeddingError, EmbeddingProvider};
use crate::semantic::similarity::{cosine_similarity, l2_norm, DimensionMismatch};

/// Matches kept per description unless the caller asks otherwise.
pub const DEFAULT_TOP_N: usize = 2;

/// Skipped candidate ids listed in one dimension-mismatch diagnostic.
pub const MISMATCH_IDS_REPORTED: usize = 5;

/// Shared flag for abandoning an in-flight match.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("match was cancelled")]
    Cancelled,

    #[error("failed to build embedding thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// A non-fatal problem encountered while matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchDiagnostic {
    /// The description could not be embedded; it contributed nothing.
    Embedding { description: String, error: String },
    /// Candidates whose embedding length disagreed with the query's were
    /// skipped for this description. One per description: `got` is the first
    /// offending length and `ids` holds the first skipped ids.
    DimensionMismatch {
        description: String,
        expected: usize,
        got: usize,
        skipped: usize,
        ids: Vec<u64>,
    },
}

/// An entry paired with its similarity to one description.
#[derive(Debug, Clone, Copy)]
pub struct ScoredCandidate<'a> {
    pub entry: &'a CatalogEntry,
    pub score: f32,
}

/// An entry in the final result, with the score and description that placed it.
#[derive(Debug, Clone, Serialize)]
pub struct MatchedItem<'a> {
    #[serde(flatten)]
    pub entry: &'a CatalogEntry,
    pub score: f32,
    /// Index into the descriptions that first selected this entry.
    pub description: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchResult<'a> {
    pub items: Vec<MatchedItem<'a>>,
    pub diagnostics: Vec<MatchDiagnostic>,
    pub usage: EmbeddingUsage,
}

#[cfg(test)]
impl<'a> MatchResult<'a> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.items.iter().map(|item| item.entry.id).collect()
    }
}

impl<'a> MatchResult<'a> {
    /// Detach from the catalog borrow (e.g. to return across a lock).
    pub fn into_report(self) -> MatchReport {
        MatchReport {
            items: self
                .items
                .into_iter()
                .map(|item| MatchedEntry {
                    entry: item.entry.clone(),
                    score: item.score,
                    description: item.description,
                })
                .collect(),
            diagnostics: self.diagnostics,
            usage: self.usage,
        }
    }
}

/// Owned [`MatchedItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedEntry {
    #[serde(flatten)]
    pub entry: CatalogEntry,
    pub score: f32,
    pub description: usize,
}

/// Owned [`MatchResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub items: Vec<MatchedEntry>,
    pub diagnostics: Vec<MatchDiagnostic>,
    pub usage: EmbeddingUsage,
}

pub struct Matcher {
    provider: Arc<dyn EmbeddingProvider>,
    cost_model: CostModel,
    pool: Option<Arc<rayon::ThreadPool>>,
    cancel: CancelToken,
}

impl Matcher {
    /// A sequential matcher with the default cost model.
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            cost_model: CostModel::default(),
            pool: None,
            cancel: CancelToken::default(),
        }
    }

    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    /// Embed descriptions concurrently on `pool`. The pool may be shared
    /// between matchers.
    pub fn with_pool(mut self, pool: Arc<rayon::ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Rank `candidates` against each description and merge the per-description
    /// top `top_n` into one deduplicated list.
    ///
    /// Per-description and per-candidate failures are recorded in
    /// [`MatchResult::diagnostics`]; only cancellation aborts the call.
    pub fn find_matches<'a, S, I>(
        &self,
        descriptions: &[S],
        candidates: I,
        top_n: usize,
    ) -> Result<MatchResult<'a>, MatchError>
    where
        S: AsRef<str> + Sync,
        I: IntoIterator<Item = &'a CatalogEntry>,
    {
        if self.cancel.is_cancelled() {
            return Err(MatchError::Cancelled);
        }

        let candidates: Vec<&'a CatalogEntry> = candidates.into_iter().collect();
        let mut result = MatchResult::default();

        if candidates.is_empty() || top_n == 0 || descriptions.is_empty() {
            log::debug!(
                "Nothing to match ({} descriptions, {} candidates, top_n {top_n})",
                descriptions.len(),
                candidates.len()
            );
            return Ok(result);
        }

        let now = Instant::now();

        // identical descriptions share one embedding call
        let mut unique: Vec<&str> = vec![];
        let mut slot_of: HashMap<&str, usize> = HashMap::new();
        for description in descriptions {
            let text = description.as_ref();
            slot_of.entry(text).or_insert_with(|| {
                unique.push(text);
                unique.len() - 1
            });
        }

        let embedded = self.embed_all(&unique);
        if self.cancel.is_cancelled() {
            log::warn!("Match cancelled after {:?}", now.elapsed());
            return Err(MatchError::Cancelled);
        }

        for (text, outcome) in unique.iter().zip(&embedded) {
            if let Some(Ok(_)) = outcome {
                let call = self.cost_model.estimate(text);
                log::debug!(
                    "Embedded {text:?} with {}: ~{} tokens, ~${:.8}",
                    self.provider.name(),
                    call.tokens,
                    call.cost
                );
                result.usage.record(call);
            }
        }

        let mut query_dims: Option<usize> = None;
        let mut seen: HashSet<u64> = HashSet::new();

        for (position, description) in descriptions.iter().enumerate() {
            let text = description.as_ref();
            let query = match &embedded[slot_of[text]] {
                Some(Ok(query)) => query,
                Some(Err(err)) => {
                    log::warn!("Skipping description {text:?}: {err}");
                    result.diagnostics.push(MatchDiagnostic::Embedding {
                        description: text.to_string(),
                        error: err.to_string(),
                    });
                    continue;
                }
                None => return Err(MatchError::Cancelled),
            };

            if let Err(err) = validate_embedding(query) {
                log::warn!("Skipping description {text:?}: {err}");
                result.diagnostics.push(MatchDiagnostic::Embedding {
                    description: text.to_string(),
                    error: err.to_string(),
                });
                continue;
            }

            let expected = *query_dims.get_or_insert(query.len());
            if query.len() != expected {
                let err = EmbeddingError::Dimensions {
                    expected,
                    got: query.len(),
                };
                log::warn!("Skipping description {text:?}: {err}");
                result.diagnostics.push(MatchDiagnostic::Embedding {
                    description: text.to_string(),
                    error: err.to_string(),
                });
                continue;
            }

            if l2_norm(query) == 0.0 {
                log::warn!("Description {text:?} embedded to a zero vector, every score is 0");
            }

            let ranked = rank(text, query, &candidates, &mut result.diagnostics);

            for scored in ranked.into_iter().take(top_n) {
                if seen.insert(scored.entry.id) {
                    result.items.push(MatchedItem {
                        entry: scored.entry,
                        score: scored.score,
                        description: position,
                    });
                }
            }
        }

        log::info!(
            "Matched {} descriptions against {} candidates: {} items, {} diagnostics, {} embedding calls (~{} tokens, ~${:.6}) in {:?}",
            descriptions.len(),
            candidates.len(),
            result.items.len(),
            result.diagnostics.len(),
            result.usage.calls,
            result.usage.tokens,
            result.usage.cost,
            now.elapsed()
        );

        Ok(result)
    }

    /// Embed each text, in input order. `None` marks a text skipped because
    /// the match was cancelled before its call was sent.
    fn embed_all(&self, texts: &[&str]) -> Vec<Option<Result<Vec<f32>, EmbeddingError>>> {
        let embed_one = |text: &&str| {
            if self.cancel.is_cancelled() {
                return None;
            }
            Some(self.provider.embed(text))
        };

        match &self.pool {
            Some(pool) if texts.len() > 1 => pool.install(|| texts.par_iter().map(embed_one).collect()),
            _ => texts.iter().map(embed_one).collect(),
        }
    }
}

/// Thread pool for concurrent embedding calls.
pub fn build_pool(threads: usize) -> Result<rayon::ThreadPool, MatchError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("embed-{i}"))
        .build()?;
    Ok(pool)
}

/// Score every candidate against `query`, best first. Equal scores keep
/// candidate order. Mismatched candidates add at most one diagnostic.
fn rank<'a>(
    description: &str,
    query: &[f32],
    candidates: &[&'a CatalogEntry],
    diagnostics: &mut Vec<MatchDiagnostic>,
) -> Vec<ScoredCandidate<'a>> {
    let mut scored = Vec::with_capacity(candidates.len());
    let mut first_mismatch: Option<DimensionMismatch> = None;
    let mut skipped = 0;
    let mut ids = vec![];

    for &entry in candidates {
        match cosine_similarity(query, &entry.embedding) {
            Ok(score) => scored.push(ScoredCandidate { entry, score }),
            Err(err) => {
                first_mismatch.get_or_insert(err);
                skipped += 1;
                if ids.len() < MISMATCH_IDS_REPORTED {
                    ids.push(entry.id);
                }
            }
        }
    }

    if let Some(err) = first_mismatch {
        log::warn!("Skipped {skipped} catalog items for {description:?}: {err}");
        diagnostics.push(MatchDiagnostic::DimensionMismatch {
            description: description.to_string(),
            expected: err.expected,
            got: err.got,
            skipped,
            ids,
        });
    }

    // sort_by is stable
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Gender;

    struct FixedProvider(Vec<(&'static str, Vec<f32>)>);

    impl EmbeddingProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.0
                .iter()
                .find(|(t, _)| *t == text)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| EmbeddingError::EmbeddingFailed(format!("no vector for {text}")))
        }
    }

    fn entry(id: u64, embedding: Vec<f32>) -> CatalogEntry {
        CatalogEntry {
            id,
            name: format!("Item {id}"),
            category: "Shirts".to_string(),
            gender: Gender::Men,
            color: String::new(),
            season: String::new(),
            usage: String::new(),
            master_category: None,
            sub_category: None,
            year: None,
            embedding,
        }
    }

    #[test]
    fn test_rank_is_stable_for_ties() {
        let a = entry(1, vec![1.0, 0.0]);
        let b = entry(2, vec![2.0, 0.0]);
        let c = entry(3, vec![0.0, 1.0]);
        let d = entry(4, vec![3.0, 0.0]);
        let candidates = vec![&c, &a, &b, &d];

        let mut diagnostics = vec![];
        let ranked = rank("q", &[1.0, 0.0], &candidates, &mut diagnostics);
        let ids: Vec<u64> = ranked.iter().map(|s| s.entry.id).collect();

        assert_eq!(ids, vec![1, 2, 4, 3]);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_rank_skips_mismatched_candidates() {
        let a = entry(1, vec![1.0, 0.0]);
        let b = entry(2, vec![1.0, 0.0, 0.0]);
        let candidates = vec![&a, &b];

        let mut diagnostics = vec![];
        let ranked = rank("q", &[1.0, 0.0], &candidates, &mut diagnostics);

        assert_eq!(ranked.len(), 1);
        assert_eq!(
            diagnostics,
            vec![MatchDiagnostic::DimensionMismatch {
                description: "q".to_string(),
                expected: 2,
                got: 3,
                skipped: 1,
                ids: vec![2],
            }]
        );
    }

    #[test]
    fn test_rank_reports_one_diagnostic_per_description() {
        let catalog: Vec<CatalogEntry> = (0..1000).map(|id| entry(id, vec![1.0, 0.0, 0.0])).collect();
        let candidates: Vec<&CatalogEntry> = catalog.iter().collect();

        let mut diagnostics = vec![];
        let ranked = rank("q", &[1.0, 0.0], &candidates, &mut diagnostics);

        assert!(ranked.is_empty());
        assert_eq!(
            diagnostics,
            vec![MatchDiagnostic::DimensionMismatch {
                description: "q".to_string(),
                expected: 2,
                got: 3,
                skipped: 1000,
                ids: vec![0, 1, 2, 3, 4],
            }]
        );
    }

    #[test]
    fn test_invalid_query_vectors_are_diagnosed() {
        let provider = FixedProvider(vec![("nan", vec![f32::NAN, 1.0]), ("empty", vec![])]);
        let matcher = Matcher::new(Arc::new(provider));
        let catalog = vec![entry(1, vec![1.0, 0.0]), entry(2, vec![0.0, 1.0])];

        let result = matcher.find_matches(&["nan", "empty"], &catalog, 2).unwrap();

        assert!(result.is_empty());
        assert_eq!(result.diagnostics.len(), 2);
        for (diagnostic, text) in result.diagnostics.iter().zip(["nan", "empty"]) {
            assert!(matches!(
                diagnostic,
                MatchDiagnostic::Embedding { description, .. } if description == text
            ));
        }
    }

    #[test]
    fn test_top_n_zero_is_empty() {
        let matcher = Matcher::new(Arc::new(FixedProvider(vec![("q", vec![1.0])])));
        let catalog = vec![entry(1, vec![1.0])];
        let result = matcher.find_matches(&["q"], &catalog, 0).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.usage.calls, 0);
    }

    #[test]
    fn test_query_dimension_fixed_by_first_success() {
        let provider = FixedProvider(vec![("first", vec![1.0, 0.0]), ("second", vec![1.0, 0.0, 0.0])]);
        let matcher = Matcher::new(Arc::new(provider));
        let catalog = vec![entry(1, vec![1.0, 0.0])];

        let result = matcher.find_matches(&["first", "second"], &catalog, 2).unwrap();

        assert_eq!(result.ids(), vec![1]);
        assert_eq!(result.diagnostics.len(), 1);
        assert!(matches!(
            &result.diagnostics[0],
            MatchDiagnostic::Embedding { description, .. } if description == "second"
        ));
    }

    #[test]
    fn test_into_report_keeps_order_and_scores() {
        let matcher = Matcher::new(Arc::new(FixedProvider(vec![("q", vec![1.0, 0.0])])));
        let catalog = vec![entry(1, vec![0.0, 1.0]), entry(2, vec![1.0, 0.0])];

        let report = matcher.find_matches(&["q"], &catalog, 2).unwrap().into_report();
        let ids: Vec<u64> = report.items.iter().map(|m| m.entry.id).collect();

        assert_eq!(ids, vec![2, 1]);
        assert!((report.items[0].score - 1.0).abs() < 1e-6);
        assert_eq!(report.usage.calls, 1);
    }
}
