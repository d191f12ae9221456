//! HTTP backends implementing [`TextGenerator`](crate::provider::TextGenerator).
//!
//! Request and response bodies are local serde structs; callers only ever
//! see the extracted text. Both backends enforce a per-request timeout so a
//! stalled provider call degrades into a normal failure result upstream.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::provider::TextGenerator;

const SYSTEM_PROMPT: &str =
    "You are an expert Manim developer who writes and repairs animation scripts.";

const GEMINI_ENDPOINT_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

fn build_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("build http client")
}

/// Truncate an error body so provider failures stay readable in logs.
fn short_body(body: &str) -> &str {
    let mut end = body.len().min(500);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

// ---------------------------------------------------------------------------
// OpenAI-style chat completions
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Backend for OpenAI-style chat completions endpoints.
pub struct OpenAiChatBackend {
    name: String,
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiChatBackend {
    pub fn new(
        name: String,
        endpoint: String,
        model: String,
        api_key: String,
        timeout: Duration,
    ) -> Self {
        Self {
            name,
            endpoint,
            model,
            api_key,
            timeout,
        }
    }
}

impl TextGenerator for OpenAiChatBackend {
    #[instrument(skip_all, fields(provider = %self.name))]
    fn generate(&self, prompt: &str) -> Result<String> {
        let client = build_client(self.timeout)?;
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: 0.7,
            max_tokens: 4000,
        };

        debug!("sending chat completion request");
        let response = client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .with_context(|| format!("call provider '{}'", self.name))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!(
                "provider '{}' returned {status}: {}",
                self.name,
                short_body(&body)
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .with_context(|| format!("parse response from provider '{}'", self.name))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("provider '{}' returned no choices", self.name))?;
        Ok(choice.message.content)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Gemini-style generateContent
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiCandidateContent,
}

#[derive(Deserialize)]
struct GeminiCandidateContent {
    parts: Vec<GeminiPart>,
}

/// Backend for Gemini-style generateContent endpoints.
pub struct GeminiBackend {
    name: String,
    endpoint_base: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl GeminiBackend {
    pub fn new(
        name: String,
        endpoint_base: Option<String>,
        model: String,
        api_key: String,
        timeout: Duration,
    ) -> Self {
        Self {
            name,
            endpoint_base: endpoint_base.unwrap_or_else(|| GEMINI_ENDPOINT_BASE.to_string()),
            model,
            api_key,
            timeout,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            self.endpoint_base, self.model, self.api_key
        )
    }
}

impl TextGenerator for GeminiBackend {
    #[instrument(skip_all, fields(provider = %self.name))]
    fn generate(&self, prompt: &str) -> Result<String> {
        let client = build_client(self.timeout)?;
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        debug!("sending generateContent request");
        let response = client
            .post(self.url())
            .json(&request)
            .send()
            .with_context(|| format!("call provider '{}'", self.name))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!(
                "provider '{}' returned {status}: {}",
                self.name,
                short_body(&body)
            ));
        }

        let parsed: GeminiResponse = response
            .json()
            .with_context(|| format!("parse response from provider '{}'", self.name))?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("provider '{}' returned no candidates", self.name))?;
        let text: String = candidate
            .content
            .parts
            .into_iter()
            .map(|part| part.text)
            .collect();
        if text.is_empty() {
            return Err(anyhow!("provider '{}' returned empty content", self.name));
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
