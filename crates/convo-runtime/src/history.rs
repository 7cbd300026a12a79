use std::time::Duration;

use async_trait::async_trait;
use convo_core::{
    ConversationKey, HistoryEntry, SessionError, SessionErrorKind, describe_http_status,
};
use reqwest::Client;
use tracing::debug;
use url::Url;

const HISTORY_PATH: [&str; 4] = ["api", "v1", "chat", "history"];

/// Source of persisted conversation history.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    /// Fetch the persisted entries of `key`, in whatever order the service
    /// keeps them. Failures are reported as `HistoryUnavailable`.
    async fn fetch(&self, key: &ConversationKey) -> Result<Vec<HistoryEntry>, SessionError>;
}

/// History fetcher backed by the workspace chat HTTP API.
#[derive(Debug, Clone)]
pub struct HttpHistoryFetcher {
    client: Client,
    endpoint: Url,
    limit: u16,
}

impl HttpHistoryFetcher {
    pub fn new(base_url: &Url, limit: u16, timeout: Duration) -> Result<Self, SessionError> {
        let client = Client::builder().timeout(timeout).build().map_err(|err| {
            SessionError::history_unavailable(format!("failed to build http client: {err}"))
        })?;

        Ok(Self {
            client,
            endpoint: endpoint_url(base_url, &HISTORY_PATH)?,
            limit: limit.max(1),
        })
    }

    fn request_url(&self, key: &ConversationKey) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("room", key.as_str())
            .append_pair("limit", &self.limit.to_string());
        url
    }
}

#[async_trait]
impl HistoryFetcher for HttpHistoryFetcher {
    async fn fetch(&self, key: &ConversationKey) -> Result<Vec<HistoryEntry>, SessionError> {
        let url = self.request_url(key);
        debug!(%url, "fetching conversation history");

        let response = self.client.get(url).send().await.map_err(|err| {
            SessionError::history_unavailable(format!("history request failed: {err}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::history_unavailable(format!(
                "history request returned {status} ({})",
                describe_http_status(status.as_u16())
            )));
        }

        response.json::<Vec<HistoryEntry>>().await.map_err(|err| {
            SessionError::history_unavailable(format!("history response was not decodable: {err}"))
        })
    }
}

/// Append `segments` to the path of `base`, keeping any existing prefix.
pub(crate) fn endpoint_url(base: &Url, segments: &[&str]) -> Result<Url, SessionError> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|()| {
            SessionError::new(
                SessionErrorKind::Internal,
                format!("'{base}' cannot be used as a base url"),
            )
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
