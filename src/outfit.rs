//! Upload → analysis → catalog matches → compatibility verdicts.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogIndex, Gender, ScopeFilter};
use crate::semantic::matcher::MatchedEntry;
use crate::semantic::{EmbeddingUsage, MatchDiagnostic, MatchError, Matcher};
use crate::vision::{
    CompatibilityChecker, ImageData, StyleAnalysis, Verdict, VisionAnalyzer, VisionError,
};

#[derive(Debug, thiserror::Error)]
pub enum RecommendError {
    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error(transparent)]
    Match(#[from] MatchError),
}

#[derive(Debug, Clone)]
pub struct RecommendOptions {
    pub top_n: usize,
    /// Ask the vision model to confirm each match
    pub check_compatibility: bool,
    /// Directory holding `{id}.jpg` catalog images
    pub images_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedItem {
    #[serde(flatten)]
    pub matched: MatchedEntry,
    /// `None` when the item was not checked (no image, or checks disabled)
    pub verdict: Option<Verdict>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub analysis: StyleAnalysis,
    pub scope: ScopeFilter,
    pub items: Vec<RecommendedItem>,
    /// Matches the compatibility check turned down
    pub rejected: Vec<RecommendedItem>,
    pub diagnostics: Vec<MatchDiagnostic>,
    pub usage: EmbeddingUsage,
}

pub struct Outfitter<'a> {
    index: &'a CatalogIndex,
    matcher: &'a Matcher,
    analyzer: &'a dyn VisionAnalyzer,
    checker: Option<&'a dyn CompatibilityChecker>,
}

impl<'a> Outfitter<'a> {
    pub fn new(
        index: &'a CatalogIndex,
        matcher: &'a Matcher,
        analyzer: &'a dyn VisionAnalyzer,
    ) -> Self {
        Self {
            index,
            matcher,
            analyzer,
            checker: None,
        }
    }

    pub fn with_checker(mut self, checker: &'a dyn CompatibilityChecker) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn recommend(
        &self,
        upload: &ImageData,
        opts: &RecommendOptions,
    ) -> Result<Recommendation, RecommendError> {
        let categories = self.index.categories();
        let analysis = self.analyzer.analyze(upload, &categories)?;

        let scope = scope_for(&analysis);
        log::debug!("Recommendation scope: {scope:?}");

        let report = self
            .matcher
            .find_matches(&analysis.items, self.index.scoped(&scope), opts.top_n)?
            .into_report();

        let mut items = vec![];
        let mut rejected = vec![];

        for matched in report.items {
            let checker = match self.checker {
                Some(checker) if opts.check_compatibility => checker,
                _ => {
                    items.push(RecommendedItem {
                        matched,
                        verdict: None,
                    });
                    continue;
                }
            };

            let path = opts.images_dir.join(format!("{}.jpg", matched.entry.id));
            let suggested = match ImageData::from_file(&path) {
                Ok(image) => image,
                Err(err) => {
                    log::warn!(
                        "No image for item {} at {}: {err}; keeping it unverified",
                        matched.entry.id,
                        path.display()
                    );
                    items.push(RecommendedItem {
                        matched,
                        verdict: None,
                    });
                    continue;
                }
            };

            let verdict = checker.check(upload, &suggested);
            log::info!(
                "Item {} ({}): {:?} {}",
                matched.entry.id,
                matched.entry.name,
                verdict.answer,
                verdict.reason
            );

            let keep = verdict.is_match();
            let item = RecommendedItem {
                matched,
                verdict: Some(verdict),
            };
            if keep {
                items.push(item);
            } else {
                rejected.push(item);
            }
        }

        Ok(Recommendation {
            analysis,
            scope,
            items,
            rejected,
            diagnostics: report.diagnostics,
            usage: report.usage,
        })
    }
}

/// Same gender (or unisex), different category from the uploaded item.
/// An unrecognised gender leaves the gender unrestricted.
fn scope_for(analysis: &StyleAnalysis) -> ScopeFilter {
    let gender = match analysis.gender.parse::<Gender>() {
        Ok(gender) => Some(gender),
        Err(err) => {
            log::warn!("Ignoring gender from analysis: {err}");
            None
        }
    };

    let category = analysis.category.trim();
    ScopeFilter {
        gender,
        exclude_category: (!category.is_empty()).then(|| category.to_string()),
    }
}
