//! Clients for the external vision model.
//!
//! Two capabilities are consumed, never implemented here:
//! - [`VisionAnalyzer`]: garment image → category, gender and three
//!   complementary item descriptions
//! - [`CompatibilityChecker`]: reference + suggested image → yes/no verdict

mod openai;
mod payload;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::openai::ApiError;

pub use openai::{OpenAiVision, DEFAULT_VISION_MODEL};
pub use payload::ImageData;

/// Structured description of an uploaded garment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleAnalysis {
    /// Complementary items to search the catalog for.
    pub items: Vec<String>,
    pub category: String,
    pub gender: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Answer {
    Yes,
    No,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub answer: Answer,
    #[serde(default)]
    pub reason: String,
}

impl Verdict {
    pub fn is_match(&self) -> bool {
        self.answer == Answer::Yes
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("vision request failed: {0}")]
    Api(#[from] ApiError),

    #[error("vision model returned an empty reply")]
    EmptyReply,

    #[error("could not parse vision reply {reply:?}: {source}")]
    Parse {
        reply: String,
        source: serde_json::Error,
    },

    #[error("unsupported image type {0}")]
    UnsupportedImage(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait VisionAnalyzer: Send + Sync {
    /// Describe the garment in `image`, choosing its category from `categories`.
    fn analyze(&self, image: &ImageData, categories: &[String])
        -> Result<StyleAnalysis, VisionError>;
}

pub trait CompatibilityChecker: Send + Sync {
    /// Judge whether `suggested` goes with `reference`. Never fails: transport
    /// problems come back as [`Answer::Error`].
    fn check(&self, reference: &ImageData, suggested: &ImageData) -> Verdict;
}

static FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").expect("valid regex"));

/// Parse a JSON reply from the model, tolerating a ```json fence.
pub fn parse_reply<T: DeserializeOwned>(reply: &str) -> Result<T, VisionError> {
    let body = FENCED
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reply)
        .trim();

    if body.is_empty() {
        return Err(VisionError::EmptyReply);
    }

    serde_json::from_str(body).map_err(|source| VisionError::Parse {
        reply: reply.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_reply() {
        let analysis: StyleAnalysis = parse_reply(
            r#"{"items": ["Fitted White Women's T-shirt", "White Canvas Sneakers", "Women's Black Skinny Jeans"], "category": "Jackets", "gender": "Women"}"#,
        )
        .unwrap();
        assert_eq!(analysis.items.len(), 3);
        assert_eq!(analysis.category, "Jackets");
        assert_eq!(analysis.gender, "Women");
    }

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "```json\n{\"answer\": \"no\", \"reason\": \"Clashing patterns.\"}\n```";
        let verdict: Verdict = parse_reply(reply).unwrap();
        assert_eq!(verdict.answer, Answer::No);
        assert!(!verdict.is_match());

        let reply = "```\n{\"answer\": \"yes\"}\n```";
        let verdict: Verdict = parse_reply(reply).unwrap();
        assert!(verdict.is_match());
        assert_eq!(verdict.reason, "");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_reply::<Verdict>("   "),
            Err(VisionError::EmptyReply)
        ));
        assert!(matches!(
            parse_reply::<Verdict>("```json\n```"),
            Err(VisionError::EmptyReply)
        ));
        assert!(matches!(
            parse_reply::<StyleAnalysis>("The jacket is black."),
            Err(VisionError::Parse { .. })
        ));
    }
}
