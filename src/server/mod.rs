//! Websocket import endpoint

pub mod protocol;
pub mod session;

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::db::store::PgContactStore;
use crate::services::import::ImportService;

/// Build the router and serve until the process is stopped.
///
/// The import endpoint only accepts websocket upgrades; plain requests to
/// the path are rejected with HTTP 400 by the upgrade extractor.
pub async fn serve(listen_addr: &str, pool: PgPool) -> Result<()> {
    let store = Arc::new(PgContactStore::new(pool));
    let service = Arc::new(ImportService::new(store));

    let app = Router::new()
        .route("/contactsimport/ws", get(contacts_import_ws))
        .layer(TraceLayer::new_for_http())
        .with_state(service);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn contacts_import_ws(
    State(service): State<Arc<ImportService>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| session::run_session(socket, service))
}
