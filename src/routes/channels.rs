//! Channel membership managed by the service that owns channels.
//!
//! Joining applies to the user's connections that are live right now;
//! a later connection starts in its default rooms only.

use crate::error::AppError;
use crate::state::AppState;
use crate::websocket::rooms;
use actix_web::{delete, post, web, HttpResponse};
use serde_json::json;

fn channel_room(channel_id: &str) -> Result<String, AppError> {
    if channel_id.trim().is_empty() {
        return Err(AppError::BadRequest("channel_id is required".into()));
    }
    Ok(rooms::channel(channel_id))
}

#[post("/api/v1/channels/{channel_id}/members/{user_id}")]
pub async fn add_member(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (channel_id, user_id) = path.into_inner();
    let room = channel_room(&channel_id)?;

    let joined = state.hub.join_user(&user_id, &room);
    tracing::info!(%room, %user_id, joined, "channel member added");
    Ok(HttpResponse::Ok().json(json!({ "room": room, "connections": joined })))
}

#[delete("/api/v1/channels/{channel_id}/members/{user_id}")]
pub async fn remove_member(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (channel_id, user_id) = path.into_inner();
    let room = channel_room(&channel_id)?;

    let left = state.hub.leave_user(&user_id, &room);
    tracing::info!(%room, %user_id, left, "channel member removed");
    Ok(HttpResponse::Ok().json(json!({ "room": room, "connections": left })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::NoopMessageSink;
    use crate::websocket::{Client, Envelope, EnvelopeType, Identity};
    use actix_web::{test, App};
    use serde_json::Value;
    use std::sync::Arc;

    fn state() -> AppState {
        let config = Config::from_vars(|key| (key == "JWT_SECRET").then(|| "s3cret".to_string()))
            .unwrap();
        AppState::new(config, Arc::new(NoopMessageSink))
    }

    #[actix_web::test]
    async fn test_added_member_receives_channel_traffic() {
        let state = state();
        let (amy, mut out_amy) = Client::new(Identity::new("amy", None), 8);
        let (bob, mut out_bob) = Client::new(Identity::new("bob", None), 8);
        state.hub.register(amy);
        state.hub.register(bob);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(crate::routes::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/channels/c-7/members/amy")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["room"], "channel:c-7");
        assert_eq!(body["connections"], 1);

        let env = Envelope::new(EnvelopeType::Chat, "bob").with_room("channel:c-7");
        assert_eq!(state.hub.broadcast(&env).delivered, 1);
        assert!(out_amy.try_recv().is_ok());
        assert!(out_bob.try_recv().is_err());

        let req = test::TestRequest::delete()
            .uri("/api/v1/channels/c-7/members/amy")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["connections"], 1);
        assert!(state.hub.room_members("channel:c-7").is_empty());
    }
}
