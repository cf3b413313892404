use std::sync::Arc;

use {
    anyhow::Result,
    clap::Subcommand,
    jcard_oauth::{
        DEFAULT_PROVIDER, ResourceClient, SessionQuery, TokenExchangeClient, TokenStore,
        load_oauth_config,
    },
    tracing::{info, warn},
};

#[derive(Subcommand)]
pub enum ApiAction {
    /// GET a resource path (e.g. "me/playlists") and print the JSON body.
    Get {
        path: String,
        #[arg(long, env = "JCARD_PROVIDER", default_value = DEFAULT_PROVIDER)]
        provider: String,
    },
}

pub async fn handle_api(action: ApiAction) -> Result<()> {
    match action {
        ApiAction::Get { path, provider } => get(&provider, &path).await,
    }
}

async fn get(provider: &str, path: &str) -> Result<()> {
    let config = load_oauth_config(provider)?;
    let Some(base_url) = config.api_base_url.clone() else {
        anyhow::bail!("provider {provider} has no api_base_url configured");
    };
    let store = Arc::new(TokenStore::for_provider(provider)?);

    if store.is_expired() && store.read()?.is_some_and(|c| c.refresh_token.is_some()) {
        info!(provider, "access token expired, refreshing");
        if let Err(e) = TokenExchangeClient::new(store.clone())?
            .refresh(&config)
            .await
        {
            warn!(provider, error = %e, "refresh failed, using stored token");
        }
    }

    let client = ResourceClient::new(base_url, SessionQuery::new(store));
    let body = client.get_json(path).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
