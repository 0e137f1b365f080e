use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SUMMARY_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_SUMMARY_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub database_url: Option<String>,
    pub sources_file: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub http_max_retries: usize,
    pub connector_timeout_secs: u64,
    pub scheduler_cron: String,
    pub summary: SummaryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub max_input_chars: usize,
    pub sentences: u32,
    pub timeout_secs: u64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            model: DEFAULT_SUMMARY_MODEL.to_string(),
            endpoint: DEFAULT_SUMMARY_ENDPOINT.to_string(),
            max_input_chars: 4000,
            sentences: 2,
            timeout_secs: 20,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            sources_file: PathBuf::from("sources.yaml"),
            user_agent: "tagg-bot/0.1".to_string(),
            http_timeout_secs: 20,
            http_max_retries: 2,
            connector_timeout_secs: 300,
            scheduler_cron: "0 0 */6 * * *".to_string(),
            summary: SummaryConfig::default(),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let http_timeout_secs = parse_or(get("TAGG_HTTP_TIMEOUT_SECS"), defaults.http_timeout_secs);
        Self {
            database_url: get("DATABASE_URL"),
            sources_file: get("TAGG_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.sources_file),
            user_agent: get("TAGG_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs,
            http_max_retries: parse_or(get("TAGG_HTTP_MAX_RETRIES"), defaults.http_max_retries),
            connector_timeout_secs: parse_or(
                get("TAGG_CONNECTOR_TIMEOUT_SECS"),
                defaults.connector_timeout_secs,
            ),
            scheduler_cron: get("TAGG_SCHEDULER_CRON").unwrap_or(defaults.scheduler_cron),
            summary: SummaryConfig {
                enabled: get("TAGG_ENRICHMENT_ENABLED")
                    .map(|v| truthy(&v))
                    .unwrap_or(defaults.summary.enabled),
                api_key: get("OPENAI_API_KEY"),
                model: get("TAGG_SUMMARY_MODEL").unwrap_or(defaults.summary.model),
                endpoint: get("TAGG_SUMMARY_ENDPOINT").unwrap_or(defaults.summary.endpoint),
                max_input_chars: parse_or(
                    get("TAGG_SUMMARY_MAX_CHARS"),
                    defaults.summary.max_input_chars,
                ),
                sentences: parse_or(get("TAGG_SUMMARY_SENTENCES"), defaults.summary.sentences).max(1),
                timeout_secs: http_timeout_secs,
            },
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn connector_timeout(&self) -> Duration {
        Duration::from_secs(self.connector_timeout_secs.max(1))
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
