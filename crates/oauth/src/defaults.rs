//! Built-in provider settings and user overrides from `oauth.toml`.
//!
//! ```toml
//! [providers.spotify]
//! client_id    = "..."
//! redirect_uri = "http://127.0.0.1:8888/callback"
//! ```

use std::{collections::HashMap, path::Path};

use {serde::Deserialize, tracing::debug, url::Url};

use crate::{
    config_dir,
    error::{Error, Result},
    types::OAuthConfig,
};

pub const DEFAULT_PROVIDER: &str = "spotify";
pub const DEFAULT_CALLBACK_PORT: u16 = 8888;

pub const CLIENT_ID_ENV: &str = "JCARD_CLIENT_ID";
pub const REDIRECT_URI_ENV: &str = "JCARD_REDIRECT_URI";

const CONFIG_FILE: &str = "oauth.toml";

/// Built-in configuration for a known provider.
pub fn builtin_config(provider: &str) -> Option<OAuthConfig> {
    match provider {
        "spotify" => Some(OAuthConfig {
            client_id: "67cad9d0d7434d5e9cec40bc12c5797d".to_string(),
            auth_url: "https://accounts.spotify.com/authorize".to_string(),
            token_url: "https://accounts.spotify.com/api/token".to_string(),
            redirect_uri: format!("http://127.0.0.1:{DEFAULT_CALLBACK_PORT}/callback"),
            scopes: vec![
                "playlist-read-private".to_string(),
                "playlist-read-collaborative".to_string(),
            ],
            api_base_url: Some("https://api.spotify.com/v1".to_string()),
        }),
        _ => None,
    }
}

/// Per-provider table in `oauth.toml`. Every field is optional so a table can
/// override just part of a built-in provider.
#[derive(Debug, Default, Deserialize)]
struct ProviderOverride {
    client_id: Option<String>,
    auth_url: Option<String>,
    token_url: Option<String>,
    redirect_uri: Option<String>,
    scopes: Option<Vec<String>>,
    api_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OAuthFile {
    #[serde(default)]
    providers: HashMap<String, ProviderOverride>,
}

impl ProviderOverride {
    fn apply(self, base: Option<OAuthConfig>, provider: &str) -> Result<OAuthConfig> {
        let mut cfg = match base {
            Some(cfg) => cfg,
            None => OAuthConfig {
                client_id: self.client_id.clone().ok_or_else(|| missing(provider))?,
                auth_url: self.auth_url.clone().ok_or_else(|| missing(provider))?,
                token_url: self.token_url.clone().ok_or_else(|| missing(provider))?,
                redirect_uri: self.redirect_uri.clone().ok_or_else(|| missing(provider))?,
                scopes: Vec::new(),
                api_base_url: None,
            },
        };
        if let Some(v) = self.client_id {
            cfg.client_id = v;
        }
        if let Some(v) = self.auth_url {
            cfg.auth_url = v;
        }
        if let Some(v) = self.token_url {
            cfg.token_url = v;
        }
        if let Some(v) = self.redirect_uri {
            cfg.redirect_uri = v;
        }
        if let Some(v) = self.scopes {
            cfg.scopes = v;
        }
        if self.api_base_url.is_some() {
            cfg.api_base_url = self.api_base_url;
        }
        Ok(cfg)
    }
}

fn missing(provider: &str) -> Error {
    Error::UnknownProvider(provider.to_string())
}

/// Resolve a provider's config: built-in defaults, then `oauth.toml`, then env.
pub fn load_oauth_config(provider: &str) -> Result<OAuthConfig> {
    let path = config_dir()?.join(CONFIG_FILE);
    let mut cfg = load_oauth_config_from(provider, &path)?;

    if let Some(id) = std::env::var(CLIENT_ID_ENV).ok().filter(|v| !v.is_empty()) {
        cfg.client_id = id;
    }
    if let Some(uri) = std::env::var(REDIRECT_URI_ENV).ok().filter(|v| !v.is_empty()) {
        cfg.redirect_uri = uri;
    }
    Ok(cfg)
}

/// Like [`load_oauth_config`] with an explicit file and no env overrides.
pub fn load_oauth_config_from(provider: &str, path: &Path) -> Result<OAuthConfig> {
    let base = builtin_config(provider);
    let mut file = match std::fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<OAuthFile>(&raw)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => OAuthFile::default(),
        Err(e) => return Err(Error::storage(path, e)),
    };

    match file.providers.remove(provider) {
        Some(overrides) => {
            debug!(provider, path = %path.display(), "applying oauth.toml overrides");
            overrides.apply(base, provider)
        },
        None => base.ok_or_else(|| missing(provider)),
    }
}

/// Port the loopback callback server should listen on, taken from `redirect_uri`.
pub fn callback_port(config: &OAuthConfig) -> u16 {
    Url::parse(&config.redirect_uri)
        .ok()
        .and_then(|u| u.port_or_known_default())
        .unwrap_or(DEFAULT_CALLBACK_PORT)
}
