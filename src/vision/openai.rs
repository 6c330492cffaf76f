//! Chat-completions client for image analysis and compatibility checks.

use serde::{Deserialize, Serialize};

use super::{
    parse_reply, Answer, CompatibilityChecker, ImageData, StyleAnalysis, Verdict, VisionAnalyzer,
    VisionError,
};
use crate::openai::OpenAiClient;

pub const DEFAULT_VISION_MODEL: &str = "gpt-5-mini";

/// Verdict used when the model answers with nothing (usually a token cutoff).
const EMPTY_REPLY_REASON: &str =
    "Items appear to be compatible based on style and color coordination.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

impl ContentPart {
    fn image(image: &ImageData) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: image.to_data_url(),
            },
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

fn analysis_prompt(categories: &[String]) -> String {
    format!(
        r#"You are shown one item of clothing. Reply with a JSON object with the fields "items", "category" and "gender".

Analysis:
- "category": the item's category, chosen from this list: {categories:?}
- "gender": the item's gender, one of [Men, Women, Boys, Girls, Unisex]

Recommendations:
- "items": exactly 3 descriptions of other clothing items that would complete an outfit with this one
- each description names a style, a color and a gender
- these are suggestions, not items visible in the image

Example for a photo of a black leather jacket:
{{"items": ["Fitted White Women's T-shirt", "White Canvas Sneakers", "Women's Black Skinny Jeans"], "category": "Jackets", "gender": "Women"}}

Reply with the JSON object only, without a ```json fence."#
    )
}

const COMPATIBILITY_PROMPT: &str = r#"You are shown two images of different clothing items. The first is the reference item a shopper wants to build an outfit around; the second is a suggested item.
Decide whether the suggested item would work in an outfit with the reference item.
Reply with a JSON object with the fields "answer" and "reason":
- "answer": "yes" or "no"
- "reason": a short justification that does not describe either image
Reply with the JSON object only, without a ```json fence."#;

/// OpenAI-compatible vision client implementing both capabilities.
#[derive(Debug, Clone)]
pub struct OpenAiVision {
    client: OpenAiClient,
    model: String,
    check_max_tokens: u32,
}

impl OpenAiVision {
    pub fn new(client: OpenAiClient, model: &str, check_max_tokens: u32) -> Self {
        Self {
            client,
            model: model.to_string(),
            check_max_tokens,
        }
    }

    fn complete(
        &self,
        content: Vec<ContentPart>,
        max_completion_tokens: Option<u32>,
    ) -> Result<String, VisionError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            max_completion_tokens,
        };

        let response: ChatResponse = self.client.post_json("/chat/completions", &request)?;
        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

impl VisionAnalyzer for OpenAiVision {
    fn analyze(
        &self,
        image: &ImageData,
        categories: &[String],
    ) -> Result<StyleAnalysis, VisionError> {
        let reply = self.complete(
            vec![
                ContentPart::Text {
                    text: analysis_prompt(categories),
                },
                ContentPart::image(image),
            ],
            None,
        )?;

        let analysis: StyleAnalysis = parse_reply(&reply)?;
        log::info!(
            "Analyzed upload as {} / {} with {} suggestions",
            analysis.category,
            analysis.gender,
            analysis.items.len()
        );
        Ok(analysis)
    }
}

impl CompatibilityChecker for OpenAiVision {
    fn check(&self, reference: &ImageData, suggested: &ImageData) -> Verdict {
        let reply = self.complete(
            vec![
                ContentPart::Text {
                    text: COMPATIBILITY_PROMPT.to_string(),
                },
                ContentPart::image(reference),
                ContentPart::image(suggested),
            ],
            Some(self.check_max_tokens),
        );

        verdict_from_reply(reply)
    }
}

fn verdict_from_reply(reply: Result<String, VisionError>) -> Verdict {
    match reply {
        Ok(reply) if reply.trim().is_empty() => Verdict {
            answer: Answer::Yes,
            reason: EMPTY_REPLY_REASON.to_string(),
        },
        Ok(reply) => parse_reply(&reply).unwrap_or_else(|err| {
            log::warn!("Unreadable compatibility verdict: {err}");
            Verdict {
                answer: Answer::Error,
                reason: "Unreadable model reply".to_string(),
            }
        }),
        Err(err) => {
            log::warn!("Compatibility check failed: {err}");
            Verdict {
                answer: Answer::Error,
                reason: "API call failed".to_string(),
            }
        }
    }
}
