//! WebSocket entry point: accepts TCP connections, performs the upgrade,
//! resolves the caller's identity and hands the socket to the hub.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::{extract_token, resolve_identity};
use crate::state::AppState;
use crate::websocket::{serve_connection, Client, PumpExit};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept loop for the WebSocket port. Each connection runs in its own task.
pub async fn run_ws_listener(listener: TcpListener, state: AppState) -> AppResult<()> {
    let local = listener
        .local_addr()
        .map_err(|e| AppError::StartServer(format!("ws listener: {e}")))?;
    tracing::info!(%local, "websocket listener ready");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "could not set TCP_NODELAY");
        }

        let state = state.clone();
        tokio::spawn(async move {
            match accept_socket(stream, state).await {
                Ok(_) => {}
                Err(AppError::Unauthorized) => {
                    tracing::debug!(%peer, "connection refused: unauthorized")
                }
                Err(e) => tracing::debug!(%peer, error = %e, "connection not established"),
            }
        });
    }
}

/// Upgrades one stream and serves it until it closes.
///
/// The token is read from the `token` query parameter or the
/// `Authorization` header during the handshake. When the anonymous policy
/// rejects the caller the socket is closed with 1008 and never registered.
pub async fn accept_socket<S>(stream: S, state: AppState) -> AppResult<PumpExit>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let pump_config = state.pump_config();
    let mut token: Option<String> = None;

    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let authorization = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok());
        token = extract_token(req.uri().query(), authorization);
        Ok(resp)
    };

    let mut socket =
        accept_hdr_async_with_config(stream, callback, Some(pump_config.socket_config()))
            .await
            .map_err(|e| AppError::BadRequest(format!("websocket handshake: {e}")))?;

    let identity = match resolve_identity(
        state.verifier.as_ref(),
        token.as_deref(),
        state.config.websocket.anonymous_policy,
    )
    .await
    {
        Ok(identity) => identity,
        Err(e) => {
            let frame = CloseFrame {
                code: CloseCode::Policy,
                reason: "unauthorized".into(),
            };
            let _ = tokio::time::timeout(pump_config.write_wait, socket.close(Some(frame))).await;
            return Err(e);
        }
    };

    let (client, outbound) = Client::new(identity, pump_config.queue_capacity);
    tracing::debug!(client_id = %client.id(), user_id = %client.user_id(), "websocket upgraded");

    Ok(serve_connection(
        state.hub.clone(),
        client,
        outbound,
        socket,
        pump_config,
        state.sink.clone(),
    )
    .await)
}
