//! One-shot handling of an inbound authorization response.
//!
//! A [`CallbackHandler`] is created per callback (page load, loopback request)
//! and moves through
//! `Idle -> AwaitingCode -> Exchanging -> {Authenticated, Failed}`.
//! It keeps no state across instances; the session lives in the token store.

use std::sync::Arc;

use {
    tracing::{debug, error, info, warn},
    url::Url,
};

use crate::{
    error::Error,
    exchange::TokenExchangeClient,
    types::{Credential, OAuthConfig},
};

/// Query parameters an authorization server may append to the redirect URI.
pub const OAUTH_RESPONSE_PARAMS: &[&str] = &[
    "code",
    "state",
    "error",
    "error_description",
    "error_uri",
    "iss",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackState {
    Idle,
    AwaitingCode,
    Exchanging,
    Authenticated,
    Failed,
}

impl CallbackState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Authenticated | Self::Failed)
    }
}

/// Receives session changes from a [`CallbackHandler`].
pub trait SessionObserver: Send + Sync {
    /// A new credential was stored.
    fn session_changed(&self, credential: &Credential);

    /// The authorization response could not be turned into a credential.
    fn authorization_failed(&self, error: &Error);
}

/// Observer that only reports through `tracing`.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn session_changed(&self, credential: &Credential) {
        info!(expires_at = credential.expires_at, "session established");
    }

    fn authorization_failed(&self, error: &Error) {
        error!(%error, "login failed");
    }
}

pub struct CallbackHandler {
    client: Arc<TokenExchangeClient>,
    config: OAuthConfig,
    observer: Arc<dyn SessionObserver>,
    state: CallbackState,
}

impl CallbackHandler {
    pub fn new(
        client: Arc<TokenExchangeClient>,
        config: OAuthConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            client,
            config,
            observer,
            state: CallbackState::Idle,
        }
    }

    pub fn state(&self) -> CallbackState {
        self.state
    }

    /// Process the address the user agent landed on.
    ///
    /// Without a `code` parameter nothing happens. On success the OAuth
    /// response parameters are removed from `location` before observers are
    /// notified. Failures are reported to the observer, never returned.
    pub async fn handle(&mut self, location: &mut Url) -> CallbackState {
        if self.state != CallbackState::Idle {
            debug!(state = ?self.state, "callback already handled");
            return self.state;
        }

        let Some(code) = query_param(location, "code").filter(|c| !c.is_empty()) else {
            if let Some(err) = query_param(location, "error") {
                let description = query_param(location, "error_description").unwrap_or_default();
                warn!(error = %err, %description, "authorization server returned an error");
            }
            return self.state;
        };

        self.state = CallbackState::AwaitingCode;
        debug!(path = location.path(), "authorization code received");

        self.state = CallbackState::Exchanging;
        match self.client.exchange(&code, &self.config).await {
            Ok(credential) => {
                strip_oauth_params(location);
                self.state = CallbackState::Authenticated;
                self.observer.session_changed(&credential);
            },
            Err(e) => {
                self.state = CallbackState::Failed;
                self.observer.authorization_failed(&e);
            },
        }
        self.state
    }
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Remove [`OAUTH_RESPONSE_PARAMS`] from `url`, keeping any other query
/// parameters. Idempotent.
pub fn strip_oauth_params(url: &mut Url) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !OAUTH_RESPONSE_PARAMS.contains(&&**k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
}
