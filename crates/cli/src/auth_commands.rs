use std::{net::Ipv4Addr, sync::Arc};

use {
    anyhow::{Context, Result},
    clap::Subcommand,
    jcard_oauth::{
        CallbackHandler, CallbackServer, CallbackState, DEFAULT_PROVIDER, LoggingObserver,
        OAuthConfig, TokenExchangeClient, TokenStore, build_authorization_url, callback_port,
        callback_server::DEFAULT_CALLBACK_TIMEOUT, load_oauth_config,
    },
    url::{Host, Url},
};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Log in to a provider via OAuth (authorization code + PKCE).
    Login {
        /// Provider name (e.g. "spotify").
        #[arg(long, env = "JCARD_PROVIDER", default_value = DEFAULT_PROVIDER)]
        provider: String,
        /// Print the authorization URL instead of opening a browser.
        #[arg(long)]
        no_browser: bool,
    },
    /// Show authentication status for all providers.
    Status,
    /// Log out from a provider.
    Logout {
        #[arg(long, env = "JCARD_PROVIDER", default_value = DEFAULT_PROVIDER)]
        provider: String,
    },
    /// Renew the access token using the stored refresh token.
    Refresh {
        #[arg(long, env = "JCARD_PROVIDER", default_value = DEFAULT_PROVIDER)]
        provider: String,
    },
}

pub async fn handle_auth(action: AuthAction) -> Result<()> {
    match action {
        AuthAction::Login {
            provider,
            no_browser,
        } => login(&provider, no_browser).await,
        AuthAction::Status => status(),
        AuthAction::Logout { provider } => logout(&provider),
        AuthAction::Refresh { provider } => refresh(&provider).await,
    }
}

/// The CLI can only receive the redirect on the `127.0.0.1` listener.
fn loopback_redirect(config: &OAuthConfig) -> Result<Url> {
    let redirect = Url::parse(&config.redirect_uri)
        .with_context(|| format!("invalid redirect_uri {}", config.redirect_uri))?;
    // The listener binds 127.0.0.1 only; `localhost` may resolve to ::1.
    let loopback = redirect.host() == Some(Host::Ipv4(Ipv4Addr::LOCALHOST));
    if !loopback || redirect.scheme() != "http" {
        anyhow::bail!(
            "redirect_uri {} is not an http://127.0.0.1 address; set JCARD_REDIRECT_URI",
            config.redirect_uri
        );
    }
    Ok(redirect)
}

async fn login(provider: &str, no_browser: bool) -> Result<()> {
    let config = load_oauth_config(provider)?;
    let redirect = loopback_redirect(&config)?;
    let store = Arc::new(TokenStore::for_provider(provider)?);

    let auth_url = build_authorization_url(&config, &store)?;
    if no_browser {
        println!("Visit this URL to log in:\n{auth_url}");
    } else {
        println!("Opening browser for authentication...");
        if open::that(auth_url.as_str()).is_err() {
            println!("Could not open browser. Please visit:\n{auth_url}");
        }
    }

    println!("Waiting for callback on {} ...", config.redirect_uri);
    let mut location = CallbackServer::wait_for_redirect(
        callback_port(&config),
        redirect.path(),
        DEFAULT_CALLBACK_TIMEOUT,
    )
    .await?;

    println!("Exchanging code for tokens...");
    let client = Arc::new(TokenExchangeClient::new(store)?);
    let mut handler = CallbackHandler::new(client, config, Arc::new(LoggingObserver));
    match handler.handle(&mut location).await {
        CallbackState::Authenticated => {
            println!("Successfully logged in to {provider}");
            Ok(())
        },
        CallbackState::Idle => anyhow::bail!("{provider} did not grant authorization"),
        state => anyhow::bail!("login to {provider} failed ({state:?}); see log for details"),
    }
}

fn status() -> Result<()> {
    let store = TokenStore::for_provider(DEFAULT_PROVIDER)?;
    let providers = store.list()?;
    if providers.is_empty() {
        println!("No authenticated providers.");
        return Ok(());
    }
    let now = store.now_millis();
    for provider in providers {
        let Some(credential) = TokenStore::for_provider(&provider)?.read()? else {
            continue;
        };
        let remaining = credential.remaining_millis(now) / 1000;
        let expiry = if remaining > 0 {
            let hours = remaining / 3600;
            let mins = (remaining % 3600) / 60;
            format!("valid ({hours}h {mins}m remaining)")
        } else {
            "expired".to_string()
        };
        let refresh = if credential.refresh_token.is_some() {
            ", refreshable"
        } else {
            ""
        };
        println!("{provider} [{expiry}{refresh}]");
    }
    Ok(())
}

fn logout(provider: &str) -> Result<()> {
    TokenStore::for_provider(provider)?.clear()?;
    println!("Logged out from {provider}");
    Ok(())
}

async fn refresh(provider: &str) -> Result<()> {
    let config = load_oauth_config(provider)?;
    let store = Arc::new(TokenStore::for_provider(provider)?);
    let client = TokenExchangeClient::new(store)?;
    let credential = client.refresh(&config).await?;
    let mins = credential.remaining_millis(client.store().now_millis()) / 60_000;
    println!("Refreshed {provider} access token ({mins}m remaining)");
    Ok(())
}
