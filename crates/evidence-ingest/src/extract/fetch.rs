use std::time::Duration;

use reqwest::Url;

use crate::config::ExtractionConfig;
use crate::error::ProcessingError;
use crate::sanitize::redact_url;

/// A fetched web page, before extraction.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedPage {
    /// Declared MIME type without parameters, `text/html` when absent.
    pub fn mime_type(&self) -> String {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "text/html".to_string())
    }
}

#[derive(Clone)]
pub struct PageFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl PageFetcher {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ProcessingError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| ProcessingError::Fetch {
                url: String::new(),
                reason: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            max_bytes: config.max_fetch_bytes,
        })
    }

    /// Fetches `url`. Only http and https are accepted; bodies larger than
    /// the configured ceiling are rejected while streaming.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, ProcessingError> {
        let safe_url = redact_url(url);
        let fetch_error = |reason: String| ProcessingError::Fetch {
            url: safe_url.clone(),
            reason,
        };

        let parsed = Url::parse(url).map_err(|e| fetch_error(format!("invalid URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(fetch_error(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        tracing::debug!(url = %safe_url, "Fetching page");

        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP status {}", status.as_u16())));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(fetch_error(format!(
                    "body of {} bytes exceeds limit of {} bytes",
                    length, self.max_bytes
                )));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| fetch_error(e.to_string()))?
        {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(fetch_error(format!(
                    "body exceeds limit of {} bytes",
                    self.max_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        tracing::info!(
            url = %redact_url(&final_url),
            status = status.as_u16(),
            bytes = body.len(),
            "Fetched page"
        );

        Ok(FetchedPage {
            url: final_url,
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
