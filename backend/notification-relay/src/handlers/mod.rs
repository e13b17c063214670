pub mod health;
pub mod notifications;
pub mod presence;
pub mod websocket;

use actix_web::web;

/// Every HTTP and websocket route of the service
pub fn configure(cfg: &mut web::ServiceConfig) {
    health::register_routes(cfg);
    notifications::register_routes(cfg);
    presence::register_routes(cfg);
    websocket::register_routes(cfg);
    cfg.route("/metrics", web::get().to(crate::metrics::serve_metrics));
}
