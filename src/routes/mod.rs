pub mod channels;
pub mod notify;
pub mod presence;
pub mod wsroute;

use actix_web::web;

/// Registers every REST endpoint.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(presence::health)
        .service(presence::online_users)
        .service(presence::ws_metrics)
        .service(presence::prometheus_metrics)
        .service(notify::notify_team)
        .service(notify::notify_user)
        .service(notify::broadcast_all)
        .service(channels::add_member)
        .service(channels::remove_member);
}
