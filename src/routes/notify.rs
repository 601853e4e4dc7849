//! Server-originated pushes. These are the only way `notification` and
//! `user_status` envelopes enter the hub; clients cannot send them.

use crate::error::AppError;
use crate::state::AppState;
use crate::websocket::{DeliveryReport, Envelope, EnvelopeType};
use actix_web::{post, web, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl PushRequest {
    fn into_envelope(self) -> Result<Envelope, AppError> {
        let kind = match self.kind.as_deref() {
            None | Some("notification") => EnvelopeType::Notification,
            Some("user_status") => EnvelopeType::UserStatus,
            Some(other) => {
                return Err(AppError::BadRequest(format!(
                    "unsupported push type: {other}"
                )))
            }
        };
        Ok(Envelope::new(kind, "").with_data(self.data))
    }
}

fn report(report: DeliveryReport) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "delivered": report.delivered,
        "dropped": report.dropped,
    }))
}

#[post("/api/v1/teams/{team_id}/notify")]
pub async fn notify_team(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<PushRequest>,
) -> Result<HttpResponse, AppError> {
    let team_id = path.into_inner();
    let envelope = body.into_inner().into_envelope()?;
    Ok(report(state.hub.send_to_team(&team_id, envelope)))
}

#[post("/api/v1/users/{user_id}/notify")]
pub async fn notify_user(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<PushRequest>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let envelope = body.into_inner().into_envelope()?;
    Ok(report(state.hub.send_to_user(&user_id, &envelope)))
}

/// Every connected client, regardless of room.
#[post("/api/v1/ws/broadcast")]
pub async fn broadcast_all(
    state: web::Data<AppState>,
    body: web::Json<PushRequest>,
) -> Result<HttpResponse, AppError> {
    let envelope = body.into_inner().into_envelope()?;
    Ok(report(state.hub.broadcast(&envelope)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::NoopMessageSink;
    use crate::websocket::{Client, Identity};
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;

    fn state() -> AppState {
        let config = Config::from_vars(|key| (key == "JWT_SECRET").then(|| "s3cret".to_string()))
            .unwrap();
        AppState::new(config, Arc::new(NoopMessageSink))
    }

    #[actix_web::test]
    async fn test_notify_team_reaches_members_only() {
        let state = state();
        let (a, mut out_a) = Client::new(Identity::new("amy", Some("T1".into())), 8);
        let (b, mut out_b) = Client::new(Identity::new("bob", Some("T2".into())), 8);
        state.hub.register(a);
        state.hub.register(b);
        while out_a.try_recv().is_ok() {}
        while out_b.try_recv().is_ok() {}

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(crate::routes::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/teams/T1/notify")
            .set_json(json!({"data": {"title": "deploy done"}}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["delivered"], 1);

        let frame: Value = serde_json::from_str(&out_a.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "notification");
        assert_eq!(frame["room"], "team:T1");
        assert_eq!(frame["data"]["title"], "deploy done");
        assert!(out_b.try_recv().is_err());
    }

    #[actix_web::test]
    async fn test_client_only_type_rejected() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(crate::routes::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/ws/broadcast")
            .set_json(json!({"type": "chat", "data": {}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
