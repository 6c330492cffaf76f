//! Shared application state for the CLI and the daemon.
//!
//! The catalog, the embedding provider and the embedding thread pool are
//! created on first use and reused for the lifetime of the process.

mod errors;

pub use errors::AppError;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogIndex, CatalogSummary, Gender, ScopeFilter};
use crate::config::{Config, ProviderKind};
use crate::openai::OpenAiClient;
use crate::outfit::{Outfitter, Recommendation, RecommendOptions};
use crate::semantic::{
    build_pool, CancelToken, CostModel, EmbeddingProvider, MatchReport, Matcher, OpenAiEmbedder,
};
use crate::vision::{ImageData, OpenAiVision};

/// A match over the catalog, as accepted by the CLI and `POST /api/match`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchRequest {
    pub descriptions: Vec<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub exclude_category: Option<String>,
    /// Falls back to `matcher.top_n`
    #[serde(default)]
    pub top_n: Option<usize>,
}

impl MatchRequest {
    fn scope(&self) -> Result<ScopeFilter, AppError> {
        let gender = self
            .gender
            .as_deref()
            .map(str::parse::<Gender>)
            .transpose()
            .map_err(AppError::BadRequest)?;

        Ok(ScopeFilter {
            gender,
            exclude_category: self.exclude_category.clone(),
        })
    }
}

pub struct App {
    config: Config,
    catalog: Mutex<Option<Arc<CatalogIndex>>>,
    provider: Mutex<Option<Arc<dyn EmbeddingProvider>>>,
    pool: Mutex<Option<Arc<rayon::ThreadPool>>>,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            catalog: Mutex::new(None),
            provider: Mutex::new(None),
            pool: Mutex::new(None),
        }
    }

    /// An app with its catalog and provider already in place.
    #[cfg(test)]
    pub fn with_parts(
        config: Config,
        catalog: CatalogIndex,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            config,
            catalog: Mutex::new(Some(Arc::new(catalog))),
            provider: Mutex::new(Some(provider)),
            pool: Mutex::new(None),
        }
    }

    /// Load the catalog on first call. Concurrent callers wait for the same
    /// load; a failed load is retried by the next caller.
    pub fn catalog(&self) -> Result<Arc<CatalogIndex>, AppError> {
        let mut guard = self
            .catalog
            .lock()
            .map_err(|_| anyhow::anyhow!("catalog lock poisoned"))?;

        if let Some(index) = guard.as_ref() {
            return Ok(index.clone());
        }

        let cfg = &self.config.catalog;
        let index = Arc::new(CatalogIndex::load(&cfg.sources(), cfg.load_timeout())?);
        *guard = Some(index.clone());
        Ok(index)
    }

    pub fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>, AppError> {
        let mut guard = self
            .provider
            .lock()
            .map_err(|_| anyhow::anyhow!("provider lock poisoned"))?;

        if let Some(provider) = guard.as_ref() {
            return Ok(provider.clone());
        }

        let provider = self.build_provider()?;
        log::info!(
            "Using {} embeddings with model {}",
            provider.name(),
            self.config.embeddings.model
        );
        *guard = Some(provider.clone());
        Ok(provider)
    }

    fn build_provider(&self) -> Result<Arc<dyn EmbeddingProvider>, AppError> {
        let cfg = &self.config.embeddings;
        match cfg.provider {
            ProviderKind::OpenAi => {
                let client = OpenAiClient::from_env(&cfg.api_base, cfg.timeout())?;
                Ok(Arc::new(OpenAiEmbedder::new(client, &cfg.model)))
            }
            #[cfg(feature = "local-embeddings")]
            ProviderKind::Local => {
                let cache_dir = cfg
                    .cache_dir
                    .as_ref()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| self.config.dir().to_path_buf());
                let embedder = crate::semantic::LocalEmbedder::new(&cfg.model, cache_dir)?;
                log::info!(
                    "Loaded local embedding model '{}' ({} dims)",
                    cfg.model,
                    embedder.dimensions()
                );
                Ok(Arc::new(embedder))
            }
            #[cfg(not(feature = "local-embeddings"))]
            ProviderKind::Local => Err(crate::semantic::EmbeddingError::InitFailed(
                "built without the local-embeddings feature".to_string(),
            )
            .into()),
        }
    }

    /// Embedding thread pool, built on first call. `None` when
    /// `embeddings.parallelism` allows a single thread.
    pub fn pool(&self) -> Result<Option<Arc<rayon::ThreadPool>>, AppError> {
        let threads = self.config.embeddings.threads();
        if threads <= 1 {
            return Ok(None);
        }

        let mut guard = self
            .pool
            .lock()
            .map_err(|_| anyhow::anyhow!("pool lock poisoned"))?;

        if let Some(pool) = guard.as_ref() {
            return Ok(Some(pool.clone()));
        }

        let pool = Arc::new(build_pool(threads)?);
        log::debug!("Built embedding pool with {threads} threads");
        *guard = Some(pool.clone());
        Ok(Some(pool))
    }

    pub fn matcher(&self, cancel: CancelToken) -> Result<Matcher, AppError> {
        let cfg = &self.config.embeddings;
        let mut matcher = Matcher::new(self.provider()?)
            .with_cost_model(CostModel::new(cfg.cost_per_1k_tokens))
            .with_cancel_token(cancel);
        if let Some(pool) = self.pool()? {
            matcher = matcher.with_pool(pool);
        }
        Ok(matcher)
    }

    pub fn find_matches(
        &self,
        request: &MatchRequest,
        cancel: CancelToken,
    ) -> Result<MatchReport, AppError> {
        let scope = request.scope()?;
        let top_n = request.top_n.unwrap_or(self.config.matcher.top_n);

        let index = self.catalog()?;
        let matcher = self.matcher(cancel)?;

        let result = matcher.find_matches(&request.descriptions, index.scoped(&scope), top_n)?;
        Ok(result.into_report())
    }

    pub fn summary(&self) -> Result<CatalogSummary, AppError> {
        Ok(self.catalog()?.summary())
    }

    /// Analyse an uploaded garment and return matching catalog items.
    pub fn recommend(
        &self,
        upload: Vec<u8>,
        top_n: Option<usize>,
        check_compatibility: bool,
    ) -> Result<Recommendation, AppError> {
        let image = ImageData::from_upload(upload).map_err(crate::outfit::RecommendError::from)?;

        let index = self.catalog()?;
        let matcher = self.matcher(CancelToken::new())?;

        let cfg = &self.config.vision;
        let client = OpenAiClient::from_env(&cfg.api_base, cfg.timeout())?;
        let vision = OpenAiVision::new(client, &cfg.model, cfg.compatibility_max_tokens);

        let opts = RecommendOptions {
            top_n: top_n.unwrap_or(self.config.matcher.top_n),
            check_compatibility,
            images_dir: PathBuf::from(&self.config.images.dir),
        };

        let outfitter = Outfitter::new(&index, &matcher, &vision).with_checker(&vision);
        Ok(outfitter.recommend(&image, &opts)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::semantic::EmbeddingError;

    struct Constant;

    impl EmbeddingProvider for Constant {
        fn name(&self) -> &str {
            "constant"
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }
    }

    fn app() -> App {
        let entries = vec![CatalogEntry {
            id: 7,
            name: "Blue Denim Jacket".to_string(),
            category: "Jackets".to_string(),
            gender: Gender::Men,
            color: "Blue".to_string(),
            season: "Fall".to_string(),
            usage: "Casual".to_string(),
            master_category: None,
            sub_category: None,
            year: None,
            embedding: vec![1.0, 0.0],
        }];
        App::with_parts(
            Config::default(),
            CatalogIndex::from_entries(entries, "memory"),
            Arc::new(Constant),
        )
    }

    #[test]
    fn test_find_matches_uses_injected_parts() {
        let app = app();
        let request = MatchRequest {
            descriptions: vec!["denim jacket".to_string()],
            ..Default::default()
        };

        let report = app.find_matches(&request, CancelToken::new()).unwrap();
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].entry.id, 7);
        assert_eq!(report.usage.calls, 1);
    }

    #[test]
    fn test_unknown_gender_is_bad_request() {
        let app = app();
        let request = MatchRequest {
            descriptions: vec!["denim jacket".to_string()],
            gender: Some("Kids".to_string()),
            ..Default::default()
        };

        let err = app.find_matches(&request, CancelToken::new()).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_cancelled_request() {
        let app = app();
        let cancel = CancelToken::new();
        cancel.cancel();

        let request = MatchRequest {
            descriptions: vec!["denim jacket".to_string()],
            ..Default::default()
        };
        let err = app.find_matches(&request, cancel).unwrap_err();
        assert!(matches!(
            err,
            AppError::Match(crate::semantic::MatchError::Cancelled)
        ));
    }

    #[test]
    fn test_pool_is_built_once() {
        let mut app = app();
        app.config.embeddings.parallelism = "2".to_string();

        let first = app.pool().unwrap().unwrap();
        app.matcher(CancelToken::new()).unwrap();
        let second = app.pool().unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.current_num_threads(), 2);
    }

    #[test]
    fn test_single_thread_needs_no_pool() {
        let mut app = app();
        app.config.embeddings.parallelism = "1".to_string();
        assert!(app.pool().unwrap().is_none());
    }

    #[test]
    fn test_bad_upload_is_rejected_before_any_call() {
        let app = app();
        let err = app.recommend(b"not an image".to_vec(), None, false).unwrap_err();
        assert!(matches!(err, AppError::Recommend(_)));
    }
}
