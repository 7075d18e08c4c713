/// PivotView WebSocket Server
///
/// Standalone server exposing an embedded engine session over WebSocket,
/// preloaded with a small hosted demo table.
use pivotview::server::run_server;
use pivotview::{EmbeddedHandler, Session, Table};
use std::sync::Arc;

const DEMO: &str = r#"[
    {"Region": "West", "State": "CA", "Product": "Chairs", "Sales": 261.96, "Quantity": 2},
    {"Region": "West", "State": "CA", "Product": "Labels", "Sales": 14.62, "Quantity": 2},
    {"Region": "West", "State": "OR", "Product": "Tables", "Sales": 957.58, "Quantity": 5},
    {"Region": "East", "State": "NY", "Product": "Chairs", "Sales": 731.94, "Quantity": 3},
    {"Region": "East", "State": "NY", "Product": "Phones", "Sales": 907.15, "Quantity": 6},
    {"Region": "South", "State": "FL", "Product": "Binders", "Sales": 22.37, "Quantity": 2},
    {"Region": "Central", "State": "TX", "Product": "Phones", "Sales": 371.17, "Quantity": 4}
]"#;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = match std::env::var("PORT").unwrap_or_else(|_| "8080".to_string()).parse() {
        Ok(port) => port,
        Err(e) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("PORT must be a number: {}", e),
            ))
        }
    };

    let handler = EmbeddedHandler::new();
    let demo = Table::from_json("demo", DEMO)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    handler
        .add_table(demo)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::AlreadyExists, e.to_string()))?;

    run_server(Session::new(Arc::new(handler)), &host, port).await
}
