//! Minimal blocking client for OpenAI-compatible HTTP APIs.
//!
//! Shared by the embedding provider and the vision/compatibility client.
//! Constructed explicitly and injected; there is no process-wide client.

use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Environment variable holding the bearer token.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct OpenAiClient {
    api_base: String,
    api_key: Option<String>,
    http: reqwest::blocking::Client,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(
        api_base: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let api_base = api_base.strip_suffix('/').unwrap_or(api_base).to_string();
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            api_base,
            api_key,
            http,
        })
    }

    /// Build a client reading the key from `OPENAI_API_KEY`.
    pub fn from_env(api_base: &str, timeout: Duration) -> Result<Self, ApiError> {
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            log::warn!("{API_KEY_ENV} is not set, requests to {api_base} are unauthenticated");
        }
        Self::new(api_base, api_key, timeout)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn post(&self, path: &str) -> reqwest::blocking::RequestBuilder {
        let url = format!("{}{}", self.api_base, path);
        log::debug!("POST {url}");

        match &self.api_key {
            Some(key) => self.http.post(&url).bearer_auth(key),
            None => self.http.post(&url),
        }
    }

    /// POST `body` as JSON to `path` and decode the JSON reply.
    pub fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.post(path).json(body).send()?;
        handle_response(response)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

fn handle_response<T>(response: reqwest::blocking::Response) -> Result<T, ApiError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let text = response.text()?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error.message)
            .unwrap_or(text);
        return Err(ApiError::Status {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str::<T>(&text).map_err(|err| {
        log::error!("{err}. tried to parse: {text:?}");
        err.into()
    })
}
