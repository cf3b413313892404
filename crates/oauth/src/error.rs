use std::path::PathBuf;

/// Errors produced by the OAuth client and token store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Token exchange attempted without a pending PKCE verifier.
    #[error("no pending PKCE code verifier; start a new authorization attempt")]
    MissingVerifier,

    /// The token endpoint did not hand back a usable access token.
    #[error("token exchange failed: {message}")]
    TokenExchangeFailed {
        status: Option<u16>,
        message: String,
        /// Error body returned by the authorization server, if any.
        payload: Option<serde_json::Value>,
    },

    #[error("no access token available; log in first")]
    NoAccessToken,

    #[error("no refresh token stored for this session")]
    MissingRefreshToken,

    #[error("another token exchange is already in progress")]
    ExchangeInProgress,

    #[error("code verifier length {0} is outside 43..=128")]
    InvalidVerifierLength(usize),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("authorization endpoint must not carry a query string: {0}")]
    AuthUrlHasQuery(String),

    #[error("unknown OAuth provider: {0}")]
    UnknownProvider(String),

    #[error("resource request failed (HTTP {status}): {body}")]
    ResourceRequestFailed { status: u16, body: String },

    #[error("no OAuth callback received within {0:?}")]
    CallbackTimeout(std::time::Duration),

    #[error("callback server stopped: {0}")]
    CallbackServer(String),

    #[error("token storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not determine home directory")]
    NoHomeDir,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("invalid OAuth config: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub(crate) fn exchange_failed(
        status: Option<u16>,
        message: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self::TokenExchangeFailed {
            status,
            message: message.into(),
            payload,
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
