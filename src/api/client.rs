use super::models::{Envelope, EnvelopeError, SessionKey};
use crate::config::Config;
use crate::error::{describe_transport_error, NimError};
use crate::types::{NimResult, Result};
use anyhow::Context;
use log::debug;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub const IMAGES_PATH: &str = "/api/v1/images";
pub const IMAGE_AUTHORIZE_PATH: &str = "/api/v1/images/authorize";
pub const SOLARNETWORK_NIM_AUTHORIZE_PATH: &str = "/solaruser/api/v1/sec/user/nim/authorize";
pub const SOLARNETWORK_WHOAMI_PATH: &str = "/solaruser/api/v1/sec/whoami";

const CONNECT_TIMEOUT_SECS: u64 = 30;
const REDACTED_SESSION_SEGMENT: &str = "****";

/// Why a request did not produce the payload the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    Transport(String),
    Http {
        status: u16,
        body: String,
    },
    Envelope {
        status: u16,
        body: String,
        error: EnvelopeError,
    },
}

impl ResponseError {
    /// HTTP status, or `0` when no response arrived.
    pub fn status(&self) -> u16 {
        match self {
            ResponseError::Transport(_) => 0,
            ResponseError::Http { status, .. } | ResponseError::Envelope { status, .. } => *status,
        }
    }

    pub fn body(&self) -> String {
        match self {
            ResponseError::Transport(message) => message.clone(),
            ResponseError::Http { body, .. } | ResponseError::Envelope { body, .. } => body.clone(),
        }
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseError::Transport(message) => write!(f, "{message}"),
            ResponseError::Http { status, body } => write!(f, "HTTP {status} - {body}"),
            ResponseError::Envelope { error, .. } => write!(f, "{error}"),
        }
    }
}

/// A URL that is only requested within an image session. Any session key
/// segment is masked when displayed so it can be logged.
#[derive(Clone)]
pub struct AuthenticatedUrl {
    url: String,
    redacted: String,
}

impl AuthenticatedUrl {
    pub fn as_str(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for AuthenticatedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted)
    }
}

impl fmt::Debug for AuthenticatedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthenticatedUrl({})", self.redacted)
    }
}

/// Transport shared by every component. Holds the image session key, which
/// only the authorization session writes.
#[derive(Clone)]
pub struct NimClient {
    client: Client,
    nim_base_url: String,
    solarnetwork_base_url: String,
    session: Arc<RwLock<Option<SessionKey>>>,
}

impl NimClient {
    pub fn new(nim_base_url: &str, solarnetwork_base_url: &str) -> Result<Self> {
        for base in [nim_base_url, solarnetwork_base_url] {
            Url::parse(base).with_context(|| format!("Invalid API URL '{base}'"))?;
        }

        let user_agent = format!("SolarNodeImageMaker-CLI/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        let client = Self {
            client,
            nim_base_url: nim_base_url.trim_end_matches('/').to_string(),
            solarnetwork_base_url: solarnetwork_base_url.trim_end_matches('/').to_string(),
            session: Arc::new(RwLock::new(None)),
        };

        debug!(
            "NimClient configured nim_base_url={} solarnetwork_base_url={}",
            client.nim_base_url, client.solarnetwork_base_url
        );

        Ok(client)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.nim_url, &config.solarnetwork_url)
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn nim_base_url(&self) -> &str {
        &self.nim_base_url
    }

    pub fn solarnetwork_base_url(&self) -> &str {
        &self.solarnetwork_base_url
    }

    fn build_url_from_base(base_url: &str, endpoint: &str) -> String {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    pub fn build_nim_url(&self, endpoint: &str) -> String {
        Self::build_url_from_base(&self.nim_base_url, endpoint)
    }

    pub fn build_solarnetwork_url(&self, endpoint: &str) -> String {
        Self::build_url_from_base(&self.solarnetwork_base_url, endpoint)
    }

    pub async fn session_key(&self) -> Option<SessionKey> {
        self.session.read().await.clone()
    }

    pub async fn has_session(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub(crate) async fn set_session_key(&self, key: Option<SessionKey>) {
        *self.session.write().await = key;
    }

    /// Image maker URL for `endpoint` with the session key appended. Fails
    /// without touching the network when no session has been established.
    pub async fn session_url(&self, endpoint: &str) -> NimResult<AuthenticatedUrl> {
        let key = self.session_key().await.ok_or(NimError::NotAuthorized)?;
        let base = self.build_nim_url(endpoint);
        let base = base.trim_end_matches('/');

        Ok(AuthenticatedUrl {
            url: format!("{}/{}", base, urlencoding::encode(key.as_str())),
            redacted: format!("{}/{}", base, REDACTED_SESSION_SEGMENT),
        })
    }

    /// Image maker URL for an endpoint the service serves without the key in
    /// its path. Still refused when no session has been established.
    pub async fn authorized_url(&self, endpoint: &str) -> NimResult<AuthenticatedUrl> {
        if !self.has_session().await {
            return Err(NimError::NotAuthorized);
        }
        let url = self.build_nim_url(endpoint);
        Ok(AuthenticatedUrl {
            redacted: url.clone(),
            url,
        })
    }

    pub async fn send(&self, request: RequestBuilder) -> std::result::Result<Response, ResponseError> {
        request
            .send()
            .await
            .map_err(|err| ResponseError::Transport(describe_transport_error(&err)))
    }

    pub async fn get_data<T>(&self, url: &AuthenticatedUrl) -> std::result::Result<T, ResponseError>
    where
        T: DeserializeOwned,
    {
        debug!("GET {}", url);
        let response = self
            .send(self.client.get(url.as_str()).header("Accept", "application/json"))
            .await?;
        Self::decode_envelope(response).await
    }

    /// Read a response body and unwrap its envelope. Non-2xx statuses and
    /// envelope failures both keep the raw body for the caller to surface.
    pub async fn decode_envelope<T>(response: Response) -> std::result::Result<T, ResponseError>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ResponseError::Transport(describe_transport_error(&err)))?;

        if !status.is_success() {
            return Err(ResponseError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(err) => {
                return Err(ResponseError::Envelope {
                    status: status.as_u16(),
                    body,
                    error: EnvelopeError::MalformedData(err.to_string()),
                })
            }
        };

        envelope
            .into_data()
            .map_err(|error| ResponseError::Envelope {
                status: status.as_u16(),
                body,
                error,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> NimClient {
        NimClient::new("https://nim.example.com/", "https://data.example.com").unwrap()
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(NimClient::new("not a url", "https://data.example.com").is_err());
    }

    #[test]
    fn test_build_urls_normalize_slashes() {
        let client = client();
        assert_eq!(
            client.build_nim_url("/api/v1/images/authorize"),
            "https://nim.example.com/api/v1/images/authorize"
        );
        assert_eq!(
            client.build_solarnetwork_url(SOLARNETWORK_WHOAMI_PATH),
            "https://data.example.com/solaruser/api/v1/sec/whoami"
        );
    }

    #[tokio::test]
    async fn test_session_url_requires_session() {
        let client = client();
        assert!(matches!(
            client.session_url("/api/v1/images/receipt/r1").await,
            Err(NimError::NotAuthorized)
        ));
        assert!(matches!(
            client.authorized_url("/api/v1/images/infos").await,
            Err(NimError::NotAuthorized)
        ));

        client.set_session_key(SessionKey::new("k/1")).await;
        let url = client.session_url("/api/v1/images/receipt/r1").await.unwrap();
        assert_eq!(
            url.as_str(),
            "https://nim.example.com/api/v1/images/receipt/r1/k%2F1"
        );
        assert_eq!(
            url.to_string(),
            "https://nim.example.com/api/v1/images/receipt/r1/****"
        );

        let url = client.authorized_url("/api/v1/images/infos").await.unwrap();
        assert_eq!(url.as_str(), "https://nim.example.com/api/v1/images/infos");
    }

    #[tokio::test]
    async fn test_decode_envelope_keeps_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/ok")
            .with_status(200)
            .with_body(r#"{"success":true,"data":"key"}"#)
            .create_async()
            .await;
        let denied = server
            .mock("GET", "/denied")
            .with_status(403)
            .with_body("Forbidden")
            .create_async()
            .await;
        let rejected = server
            .mock("GET", "/rejected")
            .with_status(200)
            .with_body(r#"{"success":false,"message":"nope"}"#)
            .create_async()
            .await;

        let http = Client::new();

        let response = http.get(format!("{}/ok", server.url())).send().await.unwrap();
        let key: String = NimClient::decode_envelope(response).await.unwrap();
        assert_eq!(key, "key");

        let response = http.get(format!("{}/denied", server.url())).send().await.unwrap();
        let err = NimClient::decode_envelope::<String>(response).await.unwrap_err();
        assert_eq!(
            err,
            ResponseError::Http {
                status: 403,
                body: "Forbidden".to_string()
            }
        );

        let response = http.get(format!("{}/rejected", server.url())).send().await.unwrap();
        let err = NimClient::decode_envelope::<String>(response).await.unwrap_err();
        assert_eq!(err.status(), 200);
        assert_eq!(err.body(), r#"{"success":false,"message":"nope"}"#);

        ok.assert_async().await;
        denied.assert_async().await;
        rejected.assert_async().await;
    }
}
