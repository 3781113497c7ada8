use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use oabridge_api::session::SessionStore;
use oabridge_api::{AppState, AppStateInner};
use oabridge_gateway::{connection, Dispatcher};
use oabridge_oauth::{refresh, AccountLocks, MemoryTxnStore, ZaloClient, ZaloConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oabridge=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let zalo_cfg = ZaloConfig::from_env()?;
    let db_path = std::env::var("OABRIDGE_DB_PATH").unwrap_or_else(|_| "oabridge.db".into());
    let host = std::env::var("OABRIDGE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("OABRIDGE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(oabridge_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let zalo = Arc::new(ZaloClient::new(zalo_cfg)?);
    let locks = AccountLocks::new();

    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        zalo: zalo.clone(),
        txns: Arc::new(MemoryTxnStore::new()),
        locks: locks.clone(),
        dispatcher: dispatcher.clone(),
        sessions: SessionStore::new(),
    });

    // Background token refresh sweep
    tokio::spawn(refresh::run_refresh_loop(db, zalo, locks));

    // Routes
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(dispatcher);

    let app = Router::new()
        .merge(oabridge_api::router(state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("OA bridge listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(dispatcher): State<Dispatcher>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher))
}
