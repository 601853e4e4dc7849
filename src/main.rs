use actix_web::{web, App, HttpServer};
use realtime_hub::{
    config, error, logging, routes, services::LoggingMessageSink, state::AppState,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let rest_addr = format!("{}:{}", cfg.host, cfg.port);
    let ws_addr = format!("{}:{}", cfg.host, cfg.ws_port);
    tracing::info!(
        %rest_addr,
        %ws_addr,
        anonymous = ?cfg.websocket.anonymous_policy,
        queue_capacity = cfg.websocket.queue_capacity,
        "starting realtime-hub"
    );

    let state = AppState::new(cfg, Arc::new(LoggingMessageSink));

    let ws_listener = TcpListener::bind(&ws_addr)
        .await
        .map_err(|e| error::AppError::StartServer(format!("bind websocket: {e}")))?;
    let ws_server = routes::wsroute::run_ws_listener(ws_listener, state.clone());

    // actix-web server futures are not Send, so run them in place rather than spawning.
    let rest_state = state.clone();
    let rest_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(rest_state.clone()))
            .configure(routes::configure)
    })
    .bind(&rest_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind REST: {e}")))?
    .run();

    tokio::select! {
        res = rest_server => {
            res.map_err(|e| error::AppError::StartServer(format!("REST server: {e}")))?;
        }
        res = ws_server => {
            res?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(
                connections = state.hub.connection_count(),
                "shutdown signal received"
            );
        }
    }

    Ok(())
}
