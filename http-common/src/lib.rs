use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::serve::Listener as _;
use axum::serve::ListenerExt as _;
use common::BoxError;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

pub type BoxRequestError = Box<dyn RequestError>;

pub trait RequestError: Display + Send + Sync + 'static {
    fn status_code(&self) -> StatusCode;
}

impl IntoResponse for BoxRequestError {
    fn into_response(self) -> axum::response::Response {
        let res = json!({
            "error": self.to_string(),
        });

        (self.status_code(), res.to_string()).into_response()
    }
}

impl<E: RequestError> From<E> for BoxRequestError {
    fn from(e: E) -> Self {
        Box::new(e)
    }
}

/// Binds the listener and returns the bound address together with the serve
/// future, so callers binding port 0 learn the actual port before awaiting.
pub async fn serve_at(
    addr: SocketAddr,
    router: axum::Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(SocketAddr, impl Future<Output = Result<(), BoxError>>), BoxError> {
    let listener = TcpListener::bind(addr).await?.tap_io(|tcp_stream| {
        let _ = tcp_stream.set_nodelay(true);
    });
    let local_addr = listener.local_addr()?;

    let serve = async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.recv().await.ok();
            })
            .await?;
        Ok(())
    };

    Ok((local_addr, serve))
}
