//! Matrix client-server API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use midgaard_core::config::{MatrixConfig, SyncConfig};
use midgaard_core::{ChatClient, ChatError, ChatEvent, RoomId, UserId};

use crate::convert::sync_events;
use crate::error::MatrixError;
use crate::retry::RetryPolicy;
use crate::types::{ErrorResponse, SyncResponse, TextMessageContent, WhoamiResponse};

/// Slack on top of the server-side long-poll timeout before the HTTP request
/// itself is abandoned.
const SYNC_REQUEST_GRACE: Duration = Duration::from_secs(15);

/// Upper bound on every non-sync request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Matrix client bound to one bot account.
#[derive(Debug)]
pub struct MatrixClient {
    http: reqwest::Client,
    base_url: Url,
    user_id: UserId,
    sync: SyncConfig,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl MatrixClient {
    /// Build a client without touching the network.
    pub fn new(config: &MatrixConfig, sync: SyncConfig) -> Result<Self, MatrixError> {
        if config.access_token.is_empty() {
            return Err(MatrixError::Config("access token is empty".into()));
        }
        let base_url = Url::parse(&config.homeserver_url)
            .map_err(|e| MatrixError::Url(format!("{}: {e}", config.homeserver_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(MatrixError::Url(config.homeserver_url.clone()));
        }

        let mut headers = HeaderMap::new();
        let token_val = HeaderValue::from_str(&format!("Bearer {}", config.access_token))
            .map_err(|_| MatrixError::Config("Invalid access token format".into()))?;
        headers.insert(AUTHORIZATION, token_val);

        // reqwest is built with rustls-no-provider; an Err here only means a
        // provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let retry = RetryPolicy::from(&sync);
        Ok(Self {
            http,
            base_url,
            user_id: UserId::new(config.user_id.clone()),
            sync,
            retry,
            request_timeout: REQUEST_TIMEOUT,
        })
    }

    /// Replace the bound on whoami, join and send requests.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build a client and confirm the access token belongs to the configured
    /// user. Any failure here is fatal for the bridge.
    pub async fn connect(config: &MatrixConfig, sync: SyncConfig) -> Result<Self, MatrixError> {
        let client = Self::new(config, sync)?;
        let whoami = client.whoami().await?;
        if whoami != client.user_id.as_str() {
            return Err(MatrixError::Config(format!(
                "access token belongs to {whoami}, not {}",
                client.user_id
            )));
        }
        info!(user_id = %client.user_id, homeserver = %client.base_url, "Authorized on homeserver");
        Ok(client)
    }

    /// Build `<base>/_matrix/client/v3/<segments...>` with each segment
    /// percent-encoded.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, MatrixError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| MatrixError::Url(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["_matrix", "client", "v3"])
            .extend(segments);
        Ok(url)
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, MatrixError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body: ErrorResponse = resp.json().await.unwrap_or_default();
        let message = if body.error.is_empty() {
            status.canonical_reason().unwrap_or("Unknown").to_string()
        } else {
            body.error
        };
        Err(MatrixError::Api {
            status: status.as_u16(),
            errcode: body.errcode,
            message,
        })
    }

    /// The user the access token authenticates as.
    pub async fn whoami(&self) -> Result<String, MatrixError> {
        let url = self.endpoint(&["account", "whoami"])?;
        let resp = self
            .http
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        let body: WhoamiResponse = resp.json().await?;
        Ok(body.user_id)
    }

    /// One long-poll round trip.
    pub async fn sync_once(&self, since: Option<&str>) -> Result<SyncResponse, MatrixError> {
        let mut url = self.endpoint(&["sync"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("timeout", &self.sync.timeout_ms.to_string());
            if let Some(since) = since {
                query.append_pair("since", since);
            }
        }
        let request_timeout = Duration::from_millis(self.sync.timeout_ms) + SYNC_REQUEST_GRACE;
        let resp = self.http.get(url).timeout(request_timeout).send().await?;
        let resp = Self::check_status(resp).await?;
        Ok(resp.json().await?)
    }

    async fn join_room(&self, room: &RoomId) -> Result<(), MatrixError> {
        let url = self.endpoint(&["rooms", room.as_str(), "join"])?;
        let resp = self
            .http
            .post(url)
            .timeout(self.request_timeout)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn send_message(&self, room: &RoomId, plain: &str, html: &str) -> Result<(), MatrixError> {
        let txn_id = uuid::Uuid::new_v4().to_string();
        let url = self.endpoint(&["rooms", room.as_str(), "send", "m.room.message", txn_id.as_str()])?;
        let resp = self
            .http
            .put(url)
            .timeout(self.request_timeout)
            .json(&TextMessageContent::html(plain, html))
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl ChatClient for MatrixClient {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    async fn join(&self, room: &RoomId) -> Result<(), ChatError> {
        Ok(self.join_room(room).await?)
    }

    async fn send_text(&self, room: &RoomId, plain: &str, html: &str) -> Result<(), ChatError> {
        Ok(self.send_message(room, plain, html).await?)
    }

    async fn stream_events(
        &self,
        events: mpsc::Sender<ChatEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ChatError> {
        let mut since: Option<String> = None;
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::select! {
                () = cancel.cancelled() => {
                    info!("Sync loop shutting down");
                    return Ok(());
                }
                result = self.sync_once(since.as_deref()) => result,
            };

            match result {
                Ok(response) => {
                    attempt = 0;
                    let batch = sync_events(&response, &self.user_id);
                    debug!(
                        next_batch = %response.next_batch,
                        events = batch.len(),
                        "Sync batch received"
                    );
                    since = Some(response.next_batch);
                    for event in batch {
                        tokio::select! {
                            () = cancel.cancelled() => return Ok(()),
                            sent = events.send(event) => {
                                if sent.is_err() {
                                    return Err(ChatError::ChannelClosed);
                                }
                            }
                        }
                    }
                }
                Err(e) if e.is_permanent() => {
                    warn!(error = %e, "Sync failed permanently");
                    return Err(e.into());
                }
                Err(e) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(error = %e, attempt, delay_ms = delay.as_millis(), "Sync failed, retrying");
                    tokio::select! {
                        () = sleep(delay) => {}
                        () = cancel.cancelled() => {
                            info!("Sync loop shutting down during retry wait");
                            return Ok(());
                        }
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(url: &str) -> MatrixConfig {
        MatrixConfig {
            homeserver_url: url.into(),
            user_id: "@midgaard:example.org".into(),
            access_token: "secret".into(),
        }
    }

    #[test]
    fn endpoint_joins_api_prefix() {
        let client = MatrixClient::new(&config("https://matrix.example.org/"), SyncConfig::default())
            .unwrap();
        let url = client.endpoint(&["account", "whoami"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://matrix.example.org/_matrix/client/v3/account/whoami"
        );
    }

    #[test]
    fn endpoint_encodes_room_segments() {
        let client =
            MatrixClient::new(&config("https://matrix.example.org"), SyncConfig::default()).unwrap();
        let url = client
            .endpoint(&["rooms", "#games:example.org", "join"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://matrix.example.org/_matrix/client/v3/rooms/%23games:example.org/join"
        );
    }

    #[test]
    fn invalid_url_rejected() {
        let result = MatrixClient::new(&config("not a url"), SyncConfig::default());
        assert!(matches!(result, Err(MatrixError::Url(_))));
    }

    #[test]
    fn empty_token_rejected() {
        let mut cfg = config("https://matrix.example.org");
        cfg.access_token.clear();
        let result = MatrixClient::new(&cfg, SyncConfig::default());
        assert!(matches!(result, Err(MatrixError::Config(_))));
    }
}
