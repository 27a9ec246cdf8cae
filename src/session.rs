use crate::api::client::{
    IMAGE_AUTHORIZE_PATH, SOLARNETWORK_NIM_AUTHORIZE_PATH, SOLARNETWORK_WHOAMI_PATH,
};
use crate::api::{NimClient, ResponseError, SessionKey};
use crate::error::NimError;
use crate::signing::{self, AuthorizationHeaders, Identity};
use crate::types::NimResult;
use chrono::Utc;
use log::{debug, info, warn};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Which party issues the image session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum AuthorizationMode {
    /// SolarNetwork issues the key in response to a directly signed request.
    #[default]
    #[value(name = "solarnetwork")]
    #[serde(rename = "solarnetwork")]
    SolarNetwork,
    /// The image maker issues the key after replaying a pre-signed SolarNetwork
    /// `whoami` request.
    #[value(name = "delegated")]
    #[serde(rename = "delegated")]
    ImageServiceDelegated,
}

impl AuthorizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationMode::SolarNetwork => "solarnetwork",
            AuthorizationMode::ImageServiceDelegated => "delegated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "solarnetwork" | "true" => Some(AuthorizationMode::SolarNetwork),
            "delegated" | "false" => Some(AuthorizationMode::ImageServiceDelegated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    Unauthenticated,
    Authorizing,
    Authorized,
}

/// Owns the handshake that produces the image session key.
pub struct AuthorizationSession {
    client: NimClient,
    state: Arc<Mutex<AuthorizationState>>,
}

/// Puts the state back to `Unauthenticated` if an attempt ends without a
/// result, including when the future is dropped mid-request.
struct AttemptGuard {
    state: Arc<Mutex<AuthorizationState>>,
    settled: bool,
}

impl AttemptGuard {
    fn settle(mut self, state: AuthorizationState) {
        *lock(&self.state) = state;
        self.settled = true;
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if !self.settled {
            *lock(&self.state) = AuthorizationState::Unauthenticated;
        }
    }
}

fn lock(state: &Mutex<AuthorizationState>) -> MutexGuard<'_, AuthorizationState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl AuthorizationSession {
    pub fn new(client: NimClient) -> Self {
        Self {
            client,
            state: Arc::new(Mutex::new(AuthorizationState::Unauthenticated)),
        }
    }

    pub fn state(&self) -> AuthorizationState {
        *lock(&self.state)
    }

    pub async fn session_key(&self) -> Option<SessionKey> {
        self.client.session_key().await
    }

    /// Run one handshake. Exactly one request is sent: a directly signed GET
    /// to SolarNetwork, or a POST to the image maker carrying a pre-signed
    /// `whoami` request.
    pub async fn authorize(
        &self,
        identity: &Identity,
        mode: AuthorizationMode,
    ) -> NimResult<SessionKey> {
        let guard = self.begin()?;

        info!(
            "Authorizing token {} via {}",
            identity.token_id(),
            mode.as_str()
        );

        let result = match mode {
            AuthorizationMode::SolarNetwork => self.authorize_direct(identity).await,
            AuthorizationMode::ImageServiceDelegated => self.authorize_delegated(identity).await,
        };

        match result {
            Ok(key) => {
                self.client.set_session_key(Some(key.clone())).await;
                guard.settle(AuthorizationState::Authorized);
                info!("Got image authorization session key");
                Ok(key)
            }
            Err(err) => {
                self.client.set_session_key(None).await;
                guard.settle(AuthorizationState::Unauthenticated);
                warn!("Failed to authorize session: {}", err);
                Err(err)
            }
        }
    }

    pub async fn sign_out(&self) {
        self.client.set_session_key(None).await;
        *lock(&self.state) = AuthorizationState::Unauthenticated;
    }

    fn begin(&self) -> NimResult<AttemptGuard> {
        let mut state = lock(&self.state);
        if *state == AuthorizationState::Authorizing {
            return Err(NimError::AuthorizationInProgress);
        }
        *state = AuthorizationState::Authorizing;

        Ok(AttemptGuard {
            state: self.state.clone(),
            settled: false,
        })
    }

    async fn authorize_direct(&self, identity: &Identity) -> NimResult<SessionKey> {
        let url = parse_url(
            &self
                .client
                .build_solarnetwork_url(SOLARNETWORK_NIM_AUTHORIZE_PATH),
        )?;
        let headers = signing::sign_direct(&Method::GET, &url, identity, Utc::now());

        debug!("GET {}", url);
        let request = self.client.http().get(url.as_str());
        self.exchange(request, &headers).await
    }

    async fn authorize_delegated(&self, identity: &Identity) -> NimResult<SessionKey> {
        let whoami = parse_url(&self.client.build_solarnetwork_url(SOLARNETWORK_WHOAMI_PATH))?;
        let headers = signing::sign_delegated(&Method::GET, &whoami, identity, Utc::now());

        let url = self.client.build_nim_url(IMAGE_AUTHORIZE_PATH);
        debug!("POST {} (pre-signed GET {})", url, whoami);
        let request = self.client.http().post(&url);
        self.exchange(request, &headers).await
    }

    async fn exchange(
        &self,
        request: reqwest::RequestBuilder,
        headers: &AuthorizationHeaders,
    ) -> NimResult<SessionKey> {
        let request = headers.apply(request.header("Accept", "application/json"));

        let response = self
            .client
            .send(request)
            .await
            .map_err(authorization_failed)?;
        let key: String = NimClient::decode_envelope(response)
            .await
            .map_err(authorization_failed)?;

        SessionKey::new(key).ok_or_else(|| NimError::AuthorizationFailed {
            status: 200,
            body: "empty session key".to_string(),
        })
    }
}

fn parse_url(url: &str) -> NimResult<Url> {
    Url::parse(url).map_err(|e| NimError::ConnectionError(format!("Invalid URL '{url}': {e}")))
}

fn authorization_failed(err: ResponseError) -> NimError {
    match err {
        ResponseError::Transport(message) => NimError::ConnectionError(message),
        other => NimError::AuthorizationFailed {
            status: other.status(),
            body: other.body(),
        },
    }
}
