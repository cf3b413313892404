use std::time::Duration;

use {
    axum::{
        Router,
        extract::State,
        http::{StatusCode, Uri},
        response::Html,
        routing::get,
    },
    tokio::{
        net::TcpListener,
        sync::{mpsc, oneshot},
    },
    tracing::{debug, info},
    url::Url,
};

use crate::error::{Error, Result};

/// How long `auth login` waits for the browser to come back.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

const DONE_PAGE: &str = "<!doctype html><html><body>\
    <h2>Authorization received</h2><p>You can close this window and return to the terminal.</p>\
    </body></html>";

const NOT_A_CALLBACK_PAGE: &str = "<!doctype html><html><body>\
    <h2>Not an authorization response</h2><p>No <code>code</code> or <code>error</code> parameter.</p>\
    </body></html>";

#[derive(Clone)]
struct ServerState {
    origin: String,
    tx: mpsc::Sender<Url>,
}

/// Loopback listener standing in for the redirect target during CLI logins.
pub struct CallbackServer;

impl CallbackServer {
    /// Wait on `127.0.0.1:port` for one authorization response at `path` and
    /// return the full URL the browser was redirected to.
    pub async fn wait_for_redirect(port: u16, path: &str, timeout: Duration) -> Result<Url> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        Self::serve(listener, path, timeout).await
    }

    pub async fn serve(listener: TcpListener, path: &str, timeout: Duration) -> Result<Url> {
        let addr = listener.local_addr()?;
        let (tx, mut rx) = mpsc::channel(1);
        let state = ServerState {
            origin: format!("http://{addr}"),
            tx,
        };
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let app = Router::new().route(&path, get(receive)).with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        info!(%addr, %path, "waiting for OAuth callback");

        let received = tokio::time::timeout(timeout, rx.recv()).await;
        let _ = shutdown_tx.send(());
        let served = server
            .await
            .map_err(|e| Error::CallbackServer(e.to_string()))?;

        match received {
            Ok(Some(url)) => Ok(url),
            Ok(None) => Err(Error::CallbackServer(match served {
                Err(e) => e.to_string(),
                Ok(()) => "listener closed".to_string(),
            })),
            Err(_) => Err(Error::CallbackTimeout(timeout)),
        }
    }
}

async fn receive(State(state): State<ServerState>, uri: Uri) -> (StatusCode, Html<&'static str>) {
    let Ok(url) = Url::parse(&format!("{}{uri}", state.origin)) else {
        return (StatusCode::BAD_REQUEST, Html(NOT_A_CALLBACK_PAGE));
    };
    if !url.query_pairs().any(|(k, _)| k == "code" || k == "error") {
        debug!(%uri, "ignoring request without authorization response");
        return (StatusCode::BAD_REQUEST, Html(NOT_A_CALLBACK_PAGE));
    }
    // Only the first response matters; later ones find the channel full.
    let _ = state.tx.try_send(url);
    (StatusCode::OK, Html(DONE_PAGE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receives_redirect_with_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let waiter = tokio::spawn(async move {
            CallbackServer::serve(listener, "/callback", Duration::from_secs(10)).await
        });

        let client = reqwest::Client::new();
        let stray = client
            .get(format!("http://{addr}/callback?tab=1"))
            .send()
            .await
            .unwrap();
        assert_eq!(stray.status(), StatusCode::BAD_REQUEST);

        let resp = client
            .get(format!("http://{addr}/callback?code=abc&state=xyz"))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());

        let url = waiter.await.unwrap().unwrap();
        assert_eq!(url.path(), "/callback");
        assert!(url.query_pairs().any(|(k, v)| k == "code" && v == "abc"));
    }

    #[tokio::test]
    async fn test_times_out_without_callback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let err = CallbackServer::serve(listener, "callback", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CallbackTimeout(_)));
    }
}
