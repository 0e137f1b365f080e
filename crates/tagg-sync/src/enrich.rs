//! Optional AI summaries. Summarization never fails a record: every problem collapses to
//! `None` and a log line.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SummaryConfig;

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// `Some("")` for blank input, `None` when no summary could be produced.
    async fn summarize(&self, text: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    async fn summarize(&self, _text: &str) -> Option<String> {
        None
    }
}

/// Chat-completions summarizer (OpenAI or any compatible endpoint).
#[derive(Debug, Clone)]
pub struct OpenAiSummarizer {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
    max_input_chars: usize,
    sentences: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
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
    content: Option<String>,
}

impl OpenAiSummarizer {
    pub fn new(config: &SummaryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("building summarizer http client")?;
        Ok(Self {
            http,
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            max_input_chars: config.max_input_chars.max(1),
            sentences: config.sentences.max(1),
        })
    }

    pub fn system_prompt(&self) -> String {
        let count = match self.sentences {
            1 => "1 sentence".to_string(),
            n => format!("{n} sentences"),
        };
        format!(
            "Summarize this public procurement notice in {count} for prospective bidders, \
             highlighting buyer, scope, and deadlines."
        )
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, text: &str) -> Option<String> {
        let text = text.trim();
        if text.is_empty() {
            return Some(String::new());
        }
        let Some(api_key) = self.api_key.as_deref() else {
            debug!("no summarizer credential configured; skipping summary");
            return None;
        };

        let input = truncate_chars(text, self.max_input_chars);
        let system = self.system_prompt();
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: input,
                },
            ],
            temperature: 0.2,
        };

        let response = match self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "summary request failed");
                return None;
            }
        };
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "summary endpoint returned an error status");
            return None;
        }
        let parsed: ChatResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "summary response was not the expected shape");
                return None;
            }
        };
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
    }
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

pub fn build_summarizer(config: &SummaryConfig) -> Arc<dyn Summarizer> {
    if !config.enabled {
        info!("enrichment disabled");
        return Arc::new(DisabledSummarizer);
    }
    match OpenAiSummarizer::new(config) {
        Ok(summarizer) => {
            if summarizer.api_key.is_none() {
                info!("OPENAI_API_KEY not set; records will be stored without summaries");
            }
            Arc::new(summarizer)
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "summarizer unavailable; continuing without summaries");
            Arc::new(DisabledSummarizer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value as JsonValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serves one canned HTTP response and hands back the request body it received.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let body_start = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client closed before sending headers");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let headers = String::from_utf8_lossy(&buf[..body_start]).to_ascii_lowercase();
            let content_length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < body_start + content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&buf[body_start..]).into_owned()
        });
        (format!("http://{addr}/v1/chat/completions"), handle)
    }

    fn summarizer_for(endpoint: &str, max_input_chars: usize) -> OpenAiSummarizer {
        OpenAiSummarizer::new(&SummaryConfig {
            api_key: Some("test-key".into()),
            endpoint: endpoint.to_string(),
            max_input_chars,
            timeout_secs: 5,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn system_prompt_names_sentence_count() {
        let summarizer = summarizer_for("http://127.0.0.1:9/", 10);
        assert_eq!(
            summarizer.system_prompt(),
            "Summarize this public procurement notice in 2 sentences for prospective bidders, \
             highlighting buyer, scope, and deadlines."
        );
    }

    #[tokio::test]
    async fn blank_input_is_empty_without_network() {
        let summarizer = summarizer_for("http://127.0.0.1:9/unreachable", 10);
        assert_eq!(summarizer.summarize("   ").await, Some(String::new()));
    }

    #[tokio::test]
    async fn missing_key_yields_none() {
        let summarizer = OpenAiSummarizer::new(&SummaryConfig::default()).unwrap();
        assert_eq!(summarizer.summarize("Road repair in Nairobi").await, None);
    }

    #[tokio::test]
    async fn disabled_summarizer_never_summarizes() {
        assert_eq!(DisabledSummarizer.summarize("anything").await, None);
    }

    #[tokio::test]
    async fn server_error_yields_none() {
        let (endpoint, server) = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#).await;
        let summarizer = summarizer_for(&endpoint, 4000);
        assert_eq!(summarizer.summarize("Road repair in Nairobi").await, None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_response_yields_none() {
        let (endpoint, server) = serve_once("200 OK", r#"{"unexpected": true"#).await;
        let summarizer = summarizer_for(&endpoint, 4000);
        assert_eq!(summarizer.summarize("Road repair in Nairobi").await, None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let summarizer = summarizer_for(&format!("http://{addr}/v1/chat/completions"), 4000);
        assert_eq!(summarizer.summarize("Road repair in Nairobi").await, None);
    }

    #[tokio::test]
    async fn success_returns_first_choice_and_sends_truncated_input() {
        let (endpoint, server) = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"  Nairobi roads authority seeks contractors.  "}}]}"#,
        )
        .await;
        let summarizer = summarizer_for(&endpoint, 12);
        let summary = summarizer
            .summarize("Road repair works along the Nairobi bypass")
            .await;
        assert_eq!(summary.as_deref(), Some("Nairobi roads authority seeks contractors."));

        let sent: JsonValue = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(sent["model"], "gpt-4o-mini");
        assert_eq!(sent["messages"][0]["role"], "system");
        assert_eq!(sent["messages"][1]["content"], "Road repair ");
    }
}
