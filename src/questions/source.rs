//! Question source interface and the shared HTTP fetch path

use crate::error::{MatchmakingError, Result};
use crate::types::{Category, Difficulty, Question};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// A provider of multiple-choice questions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Short identifier used in logs, metrics and question ids
    fn name(&self) -> String;

    /// Fetch up to `count` questions for the category and difficulty.
    /// May return fewer, or unvalidated content; the supplier filters.
    async fn fetch(
        &self,
        category: Category,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Vec<Question>>;
}

/// External sources that can be enabled through configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    OpenTdb,
    TriviaApi,
}

impl SourceKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "opentdb" => Some(SourceKind::OpenTdb),
            "the-trivia-api" | "trivia-api" => Some(SourceKind::TriviaApi),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::OpenTdb => "opentdb",
            SourceKind::TriviaApi => "the-trivia-api",
        }
    }
}

/// Timeout and retry policy for remote sources
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub request_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// reqwest client wrapper with timeout and exponential-backoff retry
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    config: HttpSourceConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MatchmakingError::ConfigurationError {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client, config })
    }

    /// GET `url` with `query` and decode the JSON body, retrying failed attempts
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        source_name: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut retry_count = 0;
        let mut delay = self.config.retry_delay;

        loop {
            match self.try_get_json(url, query).await {
                Ok(body) => {
                    debug!("Fetched {} on attempt {}", source_name, retry_count + 1);
                    return Ok(body);
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.retry_attempts {
                        return Err(MatchmakingError::ExternalSourceUnavailable {
                            source_name: source_name.to_string(),
                            message: format!("{} (after {} retries)", e, retry_count - 1),
                        }
                        .into());
                    }

                    warn!(
                        "Request to {} failed on attempt {}: {}. Retrying in {:?}",
                        source_name, retry_count, e, delay
                    );
                    sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    async fn try_get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<T, reqwest::Error> {
        self.client
            .get(url)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await
    }
}
