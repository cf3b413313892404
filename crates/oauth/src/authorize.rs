use {tracing::info, url::Url};

use crate::{
    error::{Error, Result},
    pkce::{DEFAULT_VERIFIER_LEN, derive_challenge, generate_verifier},
    storage::TokenStore,
    types::OAuthConfig,
};

/// Start an authorization attempt and return the URL to send the user agent to.
///
/// A fresh verifier replaces any unconsumed one in `store`; its S256 challenge
/// is the only PKCE material that leaves the process. An `auth_url` that
/// already has a query is rejected so the request carries exactly the six
/// OAuth parameters.
pub fn build_authorization_url(config: &OAuthConfig, store: &TokenStore) -> Result<Url> {
    let verifier = generate_verifier(DEFAULT_VERIFIER_LEN)?;
    let mut url = Url::parse(&config.auth_url)?;
    if url.query().is_some() {
        return Err(Error::AuthUrlHasQuery(config.auth_url.clone()));
    }
    store.set_pending_verifier(&verifier)?;
    let challenge = derive_challenge(&verifier);

    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.client_id)
        .append_pair("scope", &config.scope_param())
        .append_pair("redirect_uri", &config.redirect_uri)
        .append_pair("code_challenge_method", "S256")
        .append_pair("code_challenge", &challenge);

    info!(
        provider = store.namespace(),
        endpoint = %config.auth_url,
        "starting authorization attempt"
    );
    Ok(url)
}
