use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogSource;
use crate::semantic::{cost::DEFAULT_COST_PER_1K_TOKENS, DEFAULT_EMBEDDING_MODEL, DEFAULT_TOP_N};
use crate::vision::DEFAULT_VISION_MODEL;

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_PRIMARY_URL: &str =
    "https://storage.googleapis.com/retailnext00/sample_styles_with_embeddings.csv";
const DEFAULT_FALLBACK_PATH: &str = "data/sample_clothes/sample_styles_with_embeddings.csv";
const DEFAULT_IMAGES_DIR: &str = "data/sample_clothes/sample_images";
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 30;
const DEFAULT_VISION_TIMEOUT_SECS: u64 = 60;
const DEFAULT_COMPATIBILITY_MAX_TOKENS: u32 = 500;

/// Where the catalog CSV comes from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Tried first; usually a remote URL
    #[serde(default = "default_primary_url")]
    pub primary_url: String,

    /// Tried when the primary source fails
    #[serde(default = "default_fallback_path")]
    pub fallback_path: String,

    /// Timeout for fetching a remote catalog in seconds
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            primary_url: default_primary_url(),
            fallback_path: default_fallback_path(),
            load_timeout_secs: DEFAULT_LOAD_TIMEOUT_SECS,
        }
    }
}

impl CatalogConfig {
    pub fn sources(&self) -> Vec<CatalogSource> {
        [&self.primary_url, &self.fallback_path]
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| CatalogSource::parse(s.trim()))
            .collect()
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Local,
}

/// Configuration for query embeddings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// "openai" for the remote API, "local" for an on-device model
    #[serde(default)]
    pub provider: ProviderKind,

    /// Model name; must match the model the catalog was embedded with
    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    /// Estimated USD per 1000 tokens
    #[serde(default = "default_cost_per_1k_tokens")]
    pub cost_per_1k_tokens: f64,

    /// Concurrent embedding calls: "auto" or a positive integer
    #[serde(default = "default_parallelism")]
    pub parallelism: String,

    /// Where local models are cached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: default_embedding_model(),
            api_base: default_api_base(),
            timeout_secs: DEFAULT_EMBEDDING_TIMEOUT_SECS,
            cost_per_1k_tokens: DEFAULT_COST_PER_1K_TOKENS,
            parallelism: default_parallelism(),
            cache_dir: None,
        }
    }
}

impl EmbeddingsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Thread count for embedding calls. "auto" uses the available cores.
    pub fn threads(&self) -> usize {
        match self.parallelism.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Matches kept per description
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default = "default_vision_model")]
    pub model: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_vision_timeout_secs")]
    pub timeout_secs: u64,

    /// Completion budget for a single compatibility verdict
    #[serde(default = "default_compatibility_max_tokens")]
    pub compatibility_max_tokens: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model: default_vision_model(),
            api_base: default_api_base(),
            timeout_secs: DEFAULT_VISION_TIMEOUT_SECS,
            compatibility_max_tokens: DEFAULT_COMPATIBILITY_MAX_TOKENS,
        }
    }
}

impl VisionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// Directory holding `{id}.jpg` catalog images
    #[serde(default = "default_images_dir")]
    pub dir: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            dir: default_images_dir(),
        }
    }
}

fn default_primary_url() -> String {
    DEFAULT_PRIMARY_URL.to_string()
}

fn default_fallback_path() -> String {
    DEFAULT_FALLBACK_PATH.to_string()
}

fn default_load_timeout_secs() -> u64 {
    DEFAULT_LOAD_TIMEOUT_SECS
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_embedding_timeout_secs() -> u64 {
    DEFAULT_EMBEDDING_TIMEOUT_SECS
}

fn default_cost_per_1k_tokens() -> f64 {
    DEFAULT_COST_PER_1K_TOKENS
}

fn default_parallelism() -> String {
    "auto".to_string()
}

fn default_top_n() -> usize {
    DEFAULT_TOP_N
}

fn default_vision_model() -> String {
    DEFAULT_VISION_MODEL.to_string()
}

fn default_vision_timeout_secs() -> u64 {
    DEFAULT_VISION_TIMEOUT_SECS
}

fn default_compatibility_max_tokens() -> u32 {
    DEFAULT_COMPATIBILITY_MAX_TOKENS
}

fn default_images_dir() -> String {
    DEFAULT_IMAGES_DIR.to_string()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub images: ImagesConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    /// `$OUTFIT_MATCH_HOME`, or `~/.config/outfit-match`.
    pub fn base_path() -> anyhow::Result<PathBuf> {
        if let Ok(path) = std::env::var("OUTFIT_MATCH_HOME") {
            return Ok(PathBuf::from(path));
        }

        let home = my_home()
            .context("could not determine home directory")?
            .context("home directory path is empty")?;
        Ok(home.join(".config").join("outfit-match"))
    }

    /// Directory the config was loaded from.
    #[cfg(feature = "local-embeddings")]
    pub fn dir(&self) -> &Path {
        &self.base_path
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(&Self::base_path()?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.matcher.top_n == 0 {
            bail!("matcher.top_n must be greater than 0");
        }

        if self.catalog.load_timeout_secs == 0 {
            bail!("catalog.load_timeout_secs must be greater than 0");
        }

        let emb = &self.embeddings;
        if emb.timeout_secs == 0 {
            bail!("embeddings.timeout_secs must be greater than 0");
        }

        if !emb.cost_per_1k_tokens.is_finite() || emb.cost_per_1k_tokens < 0.0 {
            bail!(
                "embeddings.cost_per_1k_tokens must be a non-negative number, got {}",
                emb.cost_per_1k_tokens
            );
        }

        // "auto" or positive integer
        if emb.parallelism != "auto" {
            match emb.parallelism.parse::<u32>() {
                Ok(0) | Err(_) => bail!(
                    "embeddings.parallelism must be 'auto' or a positive integer, got '{}'",
                    emb.parallelism
                ),
                Ok(_) => {}
            }
        }

        if self.vision.timeout_secs == 0 {
            bail!("vision.timeout_secs must be greater than 0");
        }

        if self.catalog.sources().is_empty() {
            bail!("catalog needs a primary_url or a fallback_path");
        }

        Ok(())
    }

    /// Read `config.yaml` under `base_path`, writing the defaults first if
    /// it does not exist yet.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let file = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !file.exists() {
            fs::create_dir_all(base_path)
                .with_context(|| format!("could not create {}", base_path.display()))?;
            fs::write(&file, serde_yml::to_string(&Self::default())?)
                .with_context(|| format!("could not write {}", file.display()))?;
        }

        let config_str = fs::read_to_string(&file)
            .with_context(|| format!("could not read {}", file.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("{} is malformed", file.display()))?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case new fields were added
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let file = self.base_path.join(CONFIG_FILE);
        fs::write(&file, serde_yml::to_string(&self)?)
            .with_context(|| format!("could not write {}", file.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_creates_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_with(dir.path()).unwrap();

        assert!(dir.path().join(CONFIG_FILE).exists());
        assert_eq!(config.matcher.top_n, 2);
        assert_eq!(config.embeddings.model, "text-embedding-3-large");
        assert_eq!(config.embeddings.provider, ProviderKind::OpenAi);
        assert_eq!(config.vision.model, "gpt-5-mini");
        assert_eq!(config.vision.compatibility_max_tokens, 500);
        assert_eq!(config.catalog.sources().len(), 2);
        assert!(matches!(config.catalog.sources()[0], CatalogSource::Remote(_)));
        assert!(matches!(config.catalog.sources()[1], CatalogSource::Local(_)));
    }

    #[test]
    fn test_partial_file_is_filled_in() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "matcher:\n  top_n: 5\nembeddings:\n  provider: local\n  model: bge-small-en-v1.5\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path()).unwrap();
        assert_eq!(config.matcher.top_n, 5);
        assert_eq!(config.embeddings.provider, ProviderKind::Local);
        assert_eq!(config.embeddings.model, "bge-small-en-v1.5");
        assert_eq!(config.embeddings.timeout_secs, DEFAULT_EMBEDDING_TIMEOUT_SECS);

        // resaved with the missing fields
        let saved = fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("cost_per_1k_tokens"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.matcher.top_n = 0;
        assert!(config.validate().is_err());
        config.matcher.top_n = 2;

        config.embeddings.parallelism = "0".to_string();
        assert!(config.validate().is_err());
        config.embeddings.parallelism = "many".to_string();
        assert!(config.validate().is_err());
        config.embeddings.parallelism = "4".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.embeddings.threads(), 4);

        config.embeddings.cost_per_1k_tokens = -1.0;
        assert!(config.validate().is_err());
        config.embeddings.cost_per_1k_tokens = 0.0;

        config.embeddings.timeout_secs = 0;
        assert!(config.validate().is_err());
        config.embeddings.timeout_secs = 1;

        config.catalog.primary_url = String::new();
        config.catalog.fallback_path = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "matcher: [1, 2").unwrap();
        assert!(Config::load_with(dir.path()).is_err());
    }

    #[test]
    fn test_auto_parallelism() {
        let config = EmbeddingsConfig::default();
        assert!(config.threads() >= 1);
    }
}
