use std::sync::Arc;

use {secrecy::Secret, tracing::warn};

use crate::{
    error::{Error, Result},
    storage::TokenStore,
};

/// Read-side view of the session held in a [`TokenStore`].
#[derive(Clone)]
pub struct SessionQuery {
    store: Arc<TokenStore>,
    require_fresh: bool,
}

impl SessionQuery {
    /// A session exists while an access token is stored, expired or not.
    pub fn new(store: Arc<TokenStore>) -> Self {
        Self {
            store,
            require_fresh: false,
        }
    }

    /// Additionally treat an expired access token as no session.
    pub fn require_fresh(mut self) -> Self {
        self.require_fresh = true;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        let present = match self.store.read() {
            Ok(credential) => credential.is_some(),
            Err(e) => {
                warn!(provider = self.store.namespace(), error = %e, "could not read session");
                false
            },
        };
        present && !(self.require_fresh && self.store.is_expired())
    }

    /// The bearer token to attach to resource requests.
    pub fn bearer_token(&self) -> Result<Secret<String>> {
        if !self.is_authenticated() {
            return Err(Error::NoAccessToken);
        }
        self.store
            .read()?
            .map(|c| c.access_token)
            .ok_or(Error::NoAccessToken)
    }
}
