//! HTTP client for the ingestion API.

use async_trait::async_trait;
use paperdrop_extract::DocumentPayload;
use std::time::Duration;

use crate::SinkError;

const POST_TIMEOUT: Duration = Duration::from_secs(15);
const ERROR_BODY_LIMIT: usize = 200;

#[async_trait]
pub trait IngestApi: Send + Sync {
    /// Post one extracted document. Any non-2xx response is an error.
    async fn post_document(&self, document: &DocumentPayload) -> Result<(), SinkError>;
}

pub struct IngestClient {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl IngestClient {
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(POST_TIMEOUT).build()?;
        Ok(Self {
            endpoint: normalize_endpoint(endpoint),
            token,
            client,
        })
    }
}

#[async_trait]
impl IngestApi for IngestClient {
    async fn post_document(&self, document: &DocumentPayload) -> Result<(), SinkError> {
        let mut request = self.client.post(&self.endpoint).json(document);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::BadStatus {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }
        Ok(())
    }
}

/// Accept a base URL as well as a full ingest URL: strip a trailing slash
/// and append `/ingest` when it is missing.
fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    if trimmed.ends_with("/ingest") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/ingest")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_ingest_to_base_url() {
        assert_eq!(
            normalize_endpoint("http://localhost:9876"),
            "http://localhost:9876/ingest"
        );
    }

    #[test]
    fn strips_trailing_slash() {
        assert_eq!(
            normalize_endpoint("http://localhost:9876/"),
            "http://localhost:9876/ingest"
        );
    }

    #[test]
    fn keeps_full_ingest_url() {
        assert_eq!(
            normalize_endpoint("http://localhost:9876/ingest"),
            "http://localhost:9876/ingest"
        );
    }
}
