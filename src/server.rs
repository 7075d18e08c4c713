/// HTTP server exposing a session over WebSocket
use actix_web::{middleware, web, App, Error, HttpRequest, HttpResponse, HttpServer};
use actix_web_actors::ws;
use log::info;

use crate::session::Session;
use crate::websocket::SessionSocket;

/// WebSocket endpoint handler
async fn ws_index(req: HttpRequest, stream: web::Payload, session: web::Data<Session>) -> Result<HttpResponse, Error> {
    ws::start(SessionSocket::new(session.into_inner()), &req, stream)
}

/// Health check endpoint
async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Registers the `/ws` and `/health` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(ws_index))
        .route("/health", web::get().to(health_check));
}

/// Start the HTTP server with WebSocket support
pub async fn run_server(session: Session, host: &str, port: u16) -> std::io::Result<()> {
    let session = web::Data::new(session);

    info!("PivotView server listening on ws://{}:{}/ws", host, port);
    info!("Health check: http://{}:{}/health", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(session.clone())
            .wrap(middleware::Logger::default())
            // CORS for development
            .wrap(
                actix_cors::Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .configure(configure)
    })
    .bind((host, port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedded::EmbeddedHandler;
    use actix_web::test;
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_health() {
        let session = web::Data::new(Session::new(Arc::new(EmbeddedHandler::new())));
        let app = test::init_service(App::new().app_data(session).configure(configure)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, serde_json::json!({ "status": "ok" }));
    }
}
