//! HTTP client for the station API
//!
//! Only two endpoints matter to the engine: the heartbeat round trip and the
//! one-shot current-song fetch used before the push channel delivers its
//! first message. The client also derives the push channel URL.

use crate::alignment::HeartbeatChannel;
use crate::constants::{DEFAULT_API_BASE, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_USER_AGENT, WS_PATH};
use crate::error::{Error, Result};
use crate::models::{CurrentSong, HeartbeatRequest, HeartbeatResponse};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Station HTTP client
///
/// # Example
///
/// ```no_run
/// use pmosync::SyncClient;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = SyncClient::builder()
///         .api_base("http://radio.local:3000/api")
///         .session_token("id=abc123")
///         .build()?;
///
///     if let Some(song) = client.current_song().await? {
///         println!("Now playing: {}", song.title);
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SyncClient {
    client: Client,
    api_base: String,
    ws_url: Option<String>,
    session_token: Option<String>,
    request_timeout: Duration,
}

impl SyncClient {
    /// Create a client with default settings
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a builder for configuring the client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Timeout applied to every request, and to the push handshake
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Push channel URL
    ///
    /// Uses the configured override, otherwise the API base with its scheme
    /// switched to `ws`/`wss` and `/ws` appended.
    pub fn ws_url(&self) -> Result<Url> {
        if let Some(url) = &self.ws_url {
            return Ok(Url::parse(url)?);
        }

        let mut url = Url::parse(&format!(
            "{}{}",
            self.api_base.trim_end_matches('/'),
            WS_PATH
        ))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            "ws" | "wss" => return Ok(url),
            other => return Err(Error::other(format!("Unsupported scheme: {other}"))),
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::other(format!("Cannot switch scheme to {scheme}")))?;
        Ok(url)
    }

    /// Report the local playback position and receive the timeline offset
    pub async fn heartbeat(&self, client_position_ms: u64) -> Result<HeartbeatResponse> {
        let url = Url::parse(&format!("{}/heartbeat", self.api_base.trim_end_matches('/')))?;

        tracing::trace!(client_position_ms, "Sending heartbeat");

        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .json(&HeartbeatRequest { client_position_ms })
            .send()
            .await
            .map_err(|e| Error::heartbeat(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::heartbeat(format!(
                "API returned error status: {}",
                response.status()
            )));
        }

        response
            .json::<HeartbeatResponse>()
            .await
            .map_err(|e| Error::heartbeat(format!("Invalid heartbeat response: {e}")))
    }

    /// Fetch the song currently on the timeline
    pub async fn current_song(&self) -> Result<Option<CurrentSong>> {
        let url = Url::parse(&format!(
            "{}/status/current-song",
            self.api_base.trim_end_matches('/')
        ))?;

        tracing::debug!("Fetching current song: {}", url);

        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::other(format!(
                "API returned error status: {}",
                response.status()
            )));
        }

        let song: Option<CurrentSong> = response.json().await?;
        Ok(song)
    }

    /// Get the internal HTTP client
    pub fn http_client(&self) -> &Client {
        &self.client
    }
}

/// Source of the song currently on the timeline
#[async_trait]
pub trait SongSource: Send + Sync {
    async fn current_song(&self) -> Result<Option<CurrentSong>>;
}

#[async_trait]
impl SongSource for SyncClient {
    async fn current_song(&self) -> Result<Option<CurrentSong>> {
        SyncClient::current_song(self).await
    }
}

#[async_trait]
impl HeartbeatChannel for SyncClient {
    async fn heartbeat(&self, client_position_ms: u64) -> Result<HeartbeatResponse> {
        SyncClient::heartbeat(self, client_position_ms).await
    }
}

/// Builder for configuring a SyncClient
#[derive(Debug)]
pub struct ClientBuilder {
    client: Option<Client>,
    api_base: String,
    ws_url: Option<String>,
    session_token: Option<String>,
    request_timeout: Duration,
    user_agent: String,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            client: None,
            api_base: DEFAULT_API_BASE.to_string(),
            ws_url: None,
            session_token: None,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom HTTP client
    ///
    /// The session token is then only applied to the push channel; the
    /// custom client is expected to carry its own credentials.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the API base URL
    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = url.into();
        self
    }

    /// Override the push channel URL
    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    /// Session cookie sent with every request and handshake
    pub fn session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set a custom User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build the client
    pub fn build(self) -> Result<SyncClient> {
        let client = if let Some(client) = self.client {
            client
        } else {
            let mut headers = HeaderMap::new();
            if let Some(token) = &self.session_token {
                let value = HeaderValue::from_str(token)
                    .map_err(|e| Error::other(format!("Invalid session token: {e}")))?;
                headers.insert(COOKIE, value);
            }

            Client::builder()
                .user_agent(&self.user_agent)
                .timeout(self.request_timeout)
                .default_headers(headers)
                .build()?
        };

        Ok(SyncClient {
            client,
            api_base: self.api_base,
            ws_url: self.ws_url,
            session_token: self.session_token,
            request_timeout: self.request_timeout,
        })
    }
}
