use {reqwest::header::AUTHORIZATION, secrecy::ExposeSecret, tracing::debug};

use crate::{
    error::{Error, Result},
    session::SessionQuery,
};

/// Minimal client for the protected resource API: bearer-authenticated GETs
/// returning raw JSON. A 401 is reported like any other failure status.
pub struct ResourceClient {
    base_url: String,
    session: SessionQuery,
    client: reqwest::Client,
}

impl ResourceClient {
    pub fn new(base_url: impl Into<String>, session: SessionQuery) -> Self {
        Self {
            base_url: base_url.into(),
            session,
            client: reqwest::Client::new(),
        }
    }

    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let token = self.session.bearer_token()?;
        let url = self.url_for(path);
        debug!(%url, "resource GET");

        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::ResourceRequestFailed {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::TokenStore;

    #[test]
    fn test_url_for_joins_slashes() {
        let store = Arc::new(TokenStore::in_memory("spotify"));
        let client = ResourceClient::new("https://api.example.com/v1/", SessionQuery::new(store));
        assert_eq!(client.url_for("/me/playlists"), "https://api.example.com/v1/me/playlists");
        assert_eq!(client.url_for("me"), "https://api.example.com/v1/me");
    }

    #[tokio::test]
    async fn test_unauthenticated_get_fails_without_request() {
        let store = Arc::new(TokenStore::in_memory("spotify"));
        let client = ResourceClient::new("http://127.0.0.1:9", SessionQuery::new(store));
        assert!(matches!(
            client.get_json("/me").await,
            Err(Error::NoAccessToken)
        ));
    }
}
