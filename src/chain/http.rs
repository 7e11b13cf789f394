//! JSON-over-HTTP client shared by indexer providers

use super::limiter::RequestLimiter;
use crate::error::{WatchtowerError, WatchtowerResult};

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn build_client() -> WatchtowerResult<Client> {
    Ok(Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("swap-watchtower/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Rate limited GET against one indexer base URI
#[derive(Debug, Clone)]
pub struct IndexerClient {
    client: Client,
    base_uri: String,
    limiter: Arc<RequestLimiter>,
}

impl IndexerClient {
    pub fn new(client: Client, base_uri: &str, limiter: Arc<RequestLimiter>) -> Self {
        let base_uri = if base_uri.ends_with('/') {
            base_uri.to_string()
        } else {
            format!("{}/", base_uri)
        };

        Self {
            client,
            base_uri,
            limiter,
        }
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// GET `{base_uri}{path}`; 404 is absence, other non-2xx is a provider error
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> WatchtowerResult<Option<T>> {
        self.limiter.wait(cancel).await?;

        let url = format!("{}{}", self.base_uri, path);
        debug!("GET {}", redact(&url));

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WatchtowerError::Cancelled),
            response = self.client.get(&url).header("accept", "application/json").send() => response?,
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(WatchtowerError::provider(
                self.base_uri.clone(),
                format!("{} {}", status, truncate(&error_text, 200)),
            ));
        }

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WatchtowerError::Cancelled),
            body = response.bytes() => body?,
        };

        Ok(Some(serde_json::from_slice(&body)?))
    }
}

/// Hide api keys from logs
fn redact(url: &str) -> String {
    match url.find("apikey=").or_else(|| url.find("apiToken=")) {
        Some(pos) => format!("{}***", &url[..pos]),
        None => url.to_string(),
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((pos, _)) => &text[..pos],
        None => text,
    }
}
