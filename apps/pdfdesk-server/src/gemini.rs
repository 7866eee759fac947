//! Gemini `generateContent` client used as the text translator

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use pdfdesk_core::translate::parse_translation_response;
use pdfdesk_core::{TextTranslator, TranslationOutcome};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiTranslator {
    api_key: String,
    model: String,
    base_url: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiTranslator {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            http_client,
        })
    }

    async fn generate(&self, prompt: String) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        let response = self
            .http_client
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send Gemini request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Gemini response")?;
        if !status.is_success() {
            anyhow::bail!("Gemini request failed with status {status}: {body}");
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).context("Failed to parse Gemini response")?;
        response_text(parsed).context("No text in Gemini response")
    }
}

/// Instructions sent with every batch
fn build_prompt(texts: &[String], target_lang: &str) -> String {
    let input = serde_json::to_string(texts).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You are a professional translator. Translate the following array of text strings to {target_lang}.\n\
         \n\
         Rules:\n\
         1. Maintain the definition and tone.\n\
         2. Keep the translation concise to fit similar visual space if possible.\n\
         3. Return ONLY a JSON array of strings.\n\
         4. Do NOT translate technical terms that should remain in English (e.g., \"PDF\", \"API\").\n\
         5. The output array MUST have the exact same length as the input array.\n\
         \n\
         Input:\n\
         {input}\n"
    )
}

/// Text of the first candidate, parts concatenated
fn response_text(response: GenerateResponse) -> Option<String> {
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content.parts.into_iter().map(|p| p.text).collect();
    (!text.trim().is_empty()).then_some(text)
}

#[async_trait]
impl TextTranslator for GeminiTranslator {
    async fn translate(&self, texts: &[String], target_lang: &str) -> TranslationOutcome {
        match self.generate(build_prompt(texts, target_lang)).await {
            Ok(raw) => {
                debug!("Gemini answered {} bytes for {} strings", raw.len(), texts.len());
                parse_translation_response(&raw, texts)
            }
            Err(e) => {
                warn!("Translation request failed: {:#}", e);
                TranslationOutcome::Fallback(texts.to_vec())
            }
        }
    }
}
