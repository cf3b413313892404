//! OAuth 2.0 authorization code + PKCE client with durable token lifecycle.

pub mod authorize;
pub mod callback;
pub mod callback_server;
mod config_dir;
pub mod defaults;
pub mod error;
pub mod exchange;
pub mod pkce;
pub mod resource;
pub mod session;
pub mod storage;
pub mod types;

pub use {
    authorize::build_authorization_url,
    callback::{CallbackHandler, CallbackState, LoggingObserver, SessionObserver},
    callback_server::CallbackServer,
    config_dir::config_dir,
    defaults::{DEFAULT_PROVIDER, callback_port, load_oauth_config},
    exchange::TokenExchangeClient,
    pkce::{derive_challenge, generate_verifier},
    resource::ResourceClient,
    session::SessionQuery,
    storage::{Clock, FileBackend, MemoryBackend, StorageBackend, SystemClock, TokenStore},
    types::{Credential, OAuthConfig, PkceChallenge, TokenResponse},
};

pub use error::{Error, Result};
