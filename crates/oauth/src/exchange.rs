use std::{sync::Arc, time::Duration};

use {
    reqwest::header::ACCEPT,
    secrecy::ExposeSecret,
    tokio::sync::Mutex,
    tracing::{info, warn},
};

use crate::{
    error::{Error, Result},
    storage::TokenStore,
    types::{Credential, OAuthConfig, TokenResponse},
};

/// Upper bound for a single token endpoint round-trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to the token endpoint and records what it hands back in a [`TokenStore`].
///
/// Only one exchange or refresh runs at a time per client; a call made while
/// another is outstanding fails with [`Error::ExchangeInProgress`].
pub struct TokenExchangeClient {
    client: reqwest::Client,
    store: Arc<TokenStore>,
    in_flight: Mutex<()>,
}

impl TokenExchangeClient {
    pub fn new(store: Arc<TokenStore>) -> Result<Self> {
        Self::with_timeout(store, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(store: Arc<TokenStore>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("jcard-oauth/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            store,
            in_flight: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Exchange an authorization code for a credential.
    ///
    /// The pending verifier is consumed before the request goes out, so it is
    /// gone whether or not the exchange succeeds.
    pub async fn exchange(&self, code: &str, config: &OAuthConfig) -> Result<Credential> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| Error::ExchangeInProgress)?;

        let verifier = self
            .store
            .take_pending_verifier()?
            .ok_or(Error::MissingVerifier)?;

        let params = [
            ("client_id", config.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("code_verifier", verifier.as_str()),
        ];
        let response = self.request_token(&config.token_url, &params).await;
        record_outcome("authorization_code", response.is_ok());
        let response = response?;

        let credential = self.persist(&response, response.refresh_token.as_deref())?;
        info!(
            provider = self.store.namespace(),
            expires_at = credential.expires_at,
            "authorization code exchanged"
        );
        Ok(credential)
    }

    /// Renew the access token with the stored refresh token.
    ///
    /// If the server does not rotate the refresh token, the current one is kept.
    pub async fn refresh(&self, config: &OAuthConfig) -> Result<Credential> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| Error::ExchangeInProgress)?;

        let refresh_token = self
            .store
            .read()?
            .and_then(|c| c.refresh_token)
            .ok_or(Error::MissingRefreshToken)?;

        let params = [
            ("client_id", config.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret().as_str()),
        ];
        let response = self.request_token(&config.token_url, &params).await;
        record_outcome("refresh_token", response.is_ok());
        let response = response?;

        let rotated = response
            .refresh_token
            .as_deref()
            .or(Some(refresh_token.expose_secret().as_str()));
        let credential = self.persist(&response, rotated)?;
        info!(
            provider = self.store.namespace(),
            expires_at = credential.expires_at,
            rotated = response.refresh_token.is_some(),
            "access token refreshed"
        );
        Ok(credential)
    }

    fn persist(&self, response: &TokenResponse, refresh_token: Option<&str>) -> Result<Credential> {
        let access_token = response
            .usable_access_token()
            .ok_or_else(|| Error::exchange_failed(None, response.error_message(), None))?;
        // Without a declared lifetime the token is stored as already expired.
        let lifetime = response.expires_in.unwrap_or(0);
        self.store.save(access_token, refresh_token, lifetime)
    }

    /// POST a form to the token endpoint. Ok only for a 2xx carrying an access token.
    async fn request_token(&self, token_url: &str, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let resp = self
            .client
            .post(token_url)
            .header(ACCEPT, "application/json")
            .form(params)
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_timeout() {
                    "token endpoint timed out".to_string()
                } else {
                    format!("token request failed: {e}")
                };
                warn!(endpoint = token_url, error = %e, "token request failed");
                Error::exchange_failed(None, message, None)
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            Error::exchange_failed(
                Some(status.as_u16()),
                format!("reading token response: {e}"),
                None,
            )
        })?;

        let payload = serde_json::from_str::<serde_json::Value>(&body).ok();
        let parsed = payload
            .clone()
            .and_then(|v| serde_json::from_value::<TokenResponse>(v).ok())
            .unwrap_or_default();

        if status.is_success() && parsed.usable_access_token().is_some() {
            return Ok(parsed);
        }

        let message = if status.is_success() {
            parsed.error_message()
        } else {
            format!("HTTP {status}: {}", parsed.error_message())
        };
        warn!(
            endpoint = token_url,
            status = status.as_u16(),
            error = parsed.error.as_deref().unwrap_or("none"),
            "token endpoint did not issue an access token"
        );
        let payload = payload.or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| serde_json::Value::String(trimmed.to_string()))
        });
        Err(Error::exchange_failed(Some(status.as_u16()), message, payload))
    }
}

#[cfg(feature = "metrics")]
fn record_outcome(grant_type: &'static str, ok: bool) {
    let outcome = if ok { "success" } else { "failure" };
    metrics::counter!(
        "jcard_oauth_token_requests_total",
        "grant_type" => grant_type,
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_outcome(_grant_type: &'static str, _ok: bool) {}
