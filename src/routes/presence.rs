use crate::error::AppError;
use crate::metrics;
use crate::state::AppState;
use actix_web::{get, web, HttpResponse};
use serde::Serialize;

#[derive(Serialize)]
pub struct OnlineUsersResponse {
    pub team_id: String,
    pub users: Vec<String>,
    pub count: usize,
}

#[get("/health")]
pub async fn health() -> &'static str {
    "OK"
}

/// Users with at least one live connection in the team.
#[get("/api/v1/teams/{team_id}/online")]
pub async fn online_users(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let team_id = path.into_inner();
    if team_id.trim().is_empty() {
        return Err(AppError::BadRequest("team_id is required".into()));
    }

    let users = state.hub.get_online_users(&team_id);
    Ok(HttpResponse::Ok().json(OnlineUsersResponse {
        count: users.len(),
        team_id,
        users,
    }))
}

#[get("/api/v1/ws/metrics")]
pub async fn ws_metrics(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "total_connections": state.hub.connection_count(),
        "rooms": state.hub.room_count(),
    }))
}

#[get("/metrics")]
pub async fn prometheus_metrics() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::gather_text())
}
