use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::debug;

use super::prompt;
use crate::config::LlmConfig;
use crate::model::Vulnerability;

/// Structured assessment returned by the model for one vulnerability.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmAssessment {
    pub is_valid: bool,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub patch_code: Option<String>,
    #[serde(default)]
    pub explanation: String,
}

/// Client abstraction over the verification endpoint, so the engine can be
/// exercised with scripted doubles.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn verify(
        &self,
        vulnerability: &Vulnerability,
        code_context: &str,
    ) -> Result<LlmAssessment>;
}

/// Talks to an OpenAI-compatible chat-completions endpoint (a local Ollama
/// serves the same API). Transient failures retry with exponential backoff;
/// terminal failures surface as errors for the engine's per-vulnerability
/// fallback, never aborting sibling verifications.
pub struct HttpLlmClient {
    http: Client,
    url: String,
    api_key: Option<String>,
    model: String,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            bail!("LLM base URL must not be empty");
        }
        let http = Client::builder()
            .user_agent("sast-fuse/0.3")
            .timeout(config.timeout)
            .build()
            .context("failed to build LLM HTTP client")?;
        Ok(Self {
            http,
            url: completions_url(&config.base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn verify(
        &self,
        vulnerability: &Vulnerability,
        code_context: &str,
    ) -> Result<LlmAssessment> {
        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompt::SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt::user_prompt(vulnerability, code_context),
                },
            ],
            temperature: 0.3,
            max_tokens: 512,
        };

        let mut attempt = 0u32;
        let mut backoff = Duration::from_millis(200);
        loop {
            let mut request = self.http.post(&self.url).json(&payload);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(err).context("failed to call LLM chat completions API");
                    }
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(5));
                    attempt += 1;
                    continue;
                }
            };

            if !response.status().is_success() {
                if attempt >= self.max_retries {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    bail!("LLM API error ({status}): {body}");
                }
                sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(5));
                attempt += 1;
                continue;
            }

            let chat: ChatCompletionResponse = response
                .json()
                .await
                .context("failed to parse LLM response body")?;
            let content = chat
                .choices
                .into_iter()
                .find_map(|choice| choice.message.content)
                .ok_or_else(|| anyhow!("LLM response missing message content"))?;

            debug!(fingerprint = %vulnerability.fingerprint, "parsing LLM verdict");
            return parse_assessment(&content);
        }
    }
}

/// Models habitually wrap JSON in markdown fences despite instructions;
/// strip them before parsing.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    match rest.rfind("```") {
        Some(idx) => rest[..idx].trim(),
        None => rest.trim(),
    }
}

fn parse_assessment(content: &str) -> Result<LlmAssessment> {
    let body = strip_code_fences(content);
    let assessment: LlmAssessment =
        serde_json::from_str(body).context("expected JSON verdict from LLM response")?;
    Ok(assessment)
}

fn completions_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BoundedSnippet, DefectCategory, Finding, Fingerprint, Severity, ToolKind,
        DEFAULT_SNIPPET_LIMIT,
    };
    use httpmock::prelude::*;
    use std::path::PathBuf;

    fn sample_vuln() -> Vulnerability {
        let finding = Finding {
            tool: ToolKind::Semgrep,
            rule_id: "rules.insecure-strcpy".into(),
            rule_name: "Unbounded copy.".into(),
            file: PathBuf::from("src/main.c"),
            line: 3,
            column: None,
            severity: Severity::Error,
            message: "strcpy into fixed buffer".into(),
            snippet: BoundedSnippet::new("strcpy(buf, input);", DEFAULT_SNIPPET_LIMIT),
            raw_size: 64,
        };
        let fp = Fingerprint::new(&finding.file, 3, DefectCategory::MemorySafety);
        Vulnerability::new(fp, finding, Vec::new(), DefectCategory::MemorySafety)
    }

    fn config_for(url: String) -> LlmConfig {
        let mut config = LlmConfig::new(url);
        config.model = "test-model".into();
        config.timeout = Duration::from_secs(5);
        config.max_retries = 0;
        config
    }

    #[test]
    fn url_joining_handles_v1_suffix() {
        assert_eq!(
            completions_url("http://localhost:11434"),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(
            completions_url("http://localhost:11434/v1/"),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn fence_stripping_recovers_wrapped_json() {
        let fenced = "```json\n{\"is_valid\": true, \"confidence\": 0.9, \"explanation\": \"e\"}\n```";
        let assessment = parse_assessment(fenced).unwrap();
        assert!(assessment.is_valid);

        let bare = "{\"is_valid\": false, \"explanation\": \"no\"}";
        let assessment = parse_assessment(bare).unwrap();
        assert!(!assessment.is_valid);
        assert_eq!(assessment.confidence, 0.0);
    }

    #[test]
    fn garbage_content_is_an_error() {
        assert!(parse_assessment("the model rambled instead").is_err());
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn verify_parses_successful_response() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"choices":[{"message":{"content":"{\"is_valid\":true,\"confidence\":0.85,\"patch_code\":\"strncpy(buf, input, sizeof(buf));\",\"explanation\":\"bounded\"}"}}]}"#);
        });

        let client = HttpLlmClient::new(&config_for(server.base_url())).unwrap();
        let assessment = client.verify(&sample_vuln(), "ctx").await.unwrap();
        assert!(assessment.is_valid);
        assert_eq!(
            assessment.patch_code.as_deref(),
            Some("strncpy(buf, input, sizeof(buf));")
        );
        mock.assert();
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn retries_then_surfaces_server_errors() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(500);
        });

        let mut config = config_for(server.base_url());
        config.max_retries = 1;
        let client = HttpLlmClient::new(&config).unwrap();
        let err = client.verify(&sample_vuln(), "ctx").await.unwrap_err();
        assert!(err.to_string().contains("LLM API error"));
        mock.assert_hits(2);
    }
}
