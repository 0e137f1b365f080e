//! JSON-over-HTTP transport shared by every connector.
//!
//! One [`HttpFetcher`] is built at startup and handed to the pipeline behind the
//! [`JsonTransport`] trait, so connectors never create clients of their own.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One upstream call, described as data so it can be asserted on in tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub json_body: Option<JsonValue>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            json_body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: JsonValue) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            json_body: Some(body),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Decoded JSON response plus the headers some sources use for paging.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedJson {
    pub status: u16,
    pub final_url: String,
    /// Lower-cased header names.
    pub headers: BTreeMap<String, String>,
    pub body: JsonValue,
}

impl FetchedJson {
    pub fn ok(body: JsonValue) -> Self {
        Self {
            status: 200,
            final_url: String::new(),
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("response from {url} is not valid JSON: {message}")]
    Decode { url: String, message: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait JsonTransport: Send + Sync {
    async fn fetch_json(&self, source: &str, request: &FetchRequest) -> Result<FetchedJson, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 16,
            per_source_concurrency: 2,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            backoff: config.backoff,
        })
    }

    async fn per_source_semaphore(&self, source: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    fn build(&self, request: &FetchRequest) -> reqwest::RequestBuilder {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.json_body {
            builder = builder.json(body);
        }
        builder
    }

    async fn send_with_retries(&self, request: &FetchRequest) -> Result<FetchedJson, FetchError> {
        let mut attempt = 0usize;
        loop {
            match self.build(request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let headers = resp
                            .headers()
                            .iter()
                            .filter_map(|(name, value)| {
                                value
                                    .to_str()
                                    .ok()
                                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
                            })
                            .collect::<BTreeMap<_, _>>();
                        let bytes = resp.bytes().await?;
                        let body = serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode {
                            url: final_url.clone(),
                            message: e.to_string(),
                        })?;
                        return Ok(FetchedJson {
                            status: status.as_u16(),
                            final_url,
                            headers,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(status = status.as_u16(), attempt, "retrying upstream status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(error = %err, attempt, "retrying upstream request");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

#[async_trait]
impl JsonTransport for HttpFetcher {
    async fn fetch_json(&self, source: &str, request: &FetchRequest) -> Result<FetchedJson, FetchError> {
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Unavailable("global limiter closed".into()))?;
        let per_source = self.per_source_semaphore(source).await;
        let _source = per_source
            .acquire()
            .await
            .map_err(|_| FetchError::Unavailable(format!("limiter for {source} closed")))?;

        let span = info_span!("http_fetch", source, url = %request.url, method = ?request.method);
        self.send_with_retries(request).instrument(span).await
    }
}

#[derive(Debug)]
enum ScriptedReply {
    Json(FetchedJson),
    Status(u16),
}

/// Transport that replays canned responses per source and records every request.
///
/// Used by pipeline tests in place of live upstreams.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: StdMutex<HashMap<String, VecDeque<ScriptedReply>>>,
    requests: StdMutex<Vec<(String, FetchRequest)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_json(&self, source: &str, body: JsonValue) {
        self.push_response(source, FetchedJson::ok(body));
    }

    pub fn push_response(&self, source: &str, response: FetchedJson) {
        self.push(source, ScriptedReply::Json(response));
    }

    pub fn push_status(&self, source: &str, status: u16) {
        self.push(source, ScriptedReply::Status(status));
    }

    fn push(&self, source: &str, reply: ScriptedReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.entry(source.to_string()).or_default().push_back(reply);
        }
    }

    pub fn requests_for(&self, source: &str) -> Vec<FetchRequest> {
        self.requests
            .lock()
            .map(|requests| {
                requests
                    .iter()
                    .filter(|(s, _)| s == source)
                    .map(|(_, r)| r.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl JsonTransport for ScriptedTransport {
    async fn fetch_json(&self, source: &str, request: &FetchRequest) -> Result<FetchedJson, FetchError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((source.to_string(), request.clone()));
        }
        let reply = self
            .replies
            .lock()
            .map_err(|_| FetchError::Unavailable("scripted transport poisoned".into()))?
            .get_mut(source)
            .and_then(VecDeque::pop_front);
        match reply {
            Some(ScriptedReply::Json(response)) => Ok(response),
            Some(ScriptedReply::Status(status)) => Err(FetchError::HttpStatus {
                status,
                url: request.url.clone(),
            }),
            None => Err(FetchError::Unavailable(format!("no scripted reply for {source}"))),
        }
    }
}
