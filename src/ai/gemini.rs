use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::ai::analysis::PromptCompletion;
use crate::captcha::chain::{ImageToText, CAPTCHA_INSTRUCTION};
use crate::cli::config::SolverSettings;
use crate::error::SolverError;

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    fn png(bytes: &[u8]) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: "image/png".to_string(),
                data: STANDARD.encode(bytes),
            }),
        }
    }
}

/// Client for the Gemini `generateContent` endpoint. The API key travels with each call so
/// one client serves every credential in a chain.
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &SolverSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    async fn generate(&self, credential: &str, parts: Vec<Part>) -> Result<String, SolverError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model);
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
        };

        debug!("Sending request to {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", credential)
            .json(&request)
            .send()
            .await
            .map_err(|e| SolverError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SolverError::Request(format!("HTTP {}: {}", status, body.trim())));
        }

        let reply = response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| SolverError::MalformedResponse(e.to_string()))?;

        let text: String = reply
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(SolverError::EmptyResponse);
        }

        Ok(text)
    }
}

#[async_trait]
impl ImageToText for GeminiClient {
    async fn recognize(&self, credential: &str, image_png: &[u8]) -> Result<String, SolverError> {
        self.generate(credential, vec![Part::text(CAPTCHA_INSTRUCTION), Part::png(image_png)])
            .await
    }
}

#[async_trait]
impl PromptCompletion for GeminiClient {
    async fn complete(&self, credential: &str, prompt: &str) -> Result<String, SolverError> {
        self.generate(credential, vec![Part::text(prompt)]).await
    }
}
