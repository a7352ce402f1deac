use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use vesper_api::auth::{self, AppState, AppStateInner};
use vesper_api::middleware::require_auth;
use vesper_api::{chats, messages, users};
use vesper_core::{ChatService, MessageService, Sweeper};
use vesper_gateway::connection;
use vesper_gateway::dispatcher::Dispatcher;

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vesper=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("VESPER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("VESPER_DB_PATH").unwrap_or_else(|_| "vesper.db".into());
    let host = std::env::var("VESPER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("VESPER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    // Default sweep schedule is the top of every hour; this overrides it
    // with a fixed period, mainly for local development.
    let sweep_interval = std::env::var("VESPER_SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);

    // Init database
    let db = Arc::new(vesper_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state: the dispatcher is handed to every service explicitly
    let dispatcher = Dispatcher::new();
    let message_service = MessageService::new(db.clone(), dispatcher.clone());
    let chat_service = ChatService::new(db.clone(), dispatcher.clone());

    // Background expiry sweeper (single-flight by construction)
    let sweeper = Sweeper::new(db.clone(), message_service.clone(), chat_service.clone());
    tokio::spawn(sweeper.run(sweep_interval));

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        messages: message_service,
        chats: chat_service,
        jwt_secret: jwt_secret.clone(),
    });

    let state = ServerState {
        dispatcher,
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/users/search", get(users::search_users))
        .route("/users/{user_id}", get(users::get_user))
        .route("/messages/send", post(messages::send_message))
        .route("/messages/chat/{chat_id}", get(messages::get_chat_messages))
        .route("/messages/{message_id}", delete(messages::delete_message))
        .route("/messages/{message_id}/remote", delete(messages::delete_message_remote))
        .route("/messages/{message_id}/delivered", post(messages::mark_delivered))
        .route("/messages/{message_id}/read", post(messages::mark_read))
        .route("/messages/{message_id}/auto-delete", post(messages::set_auto_delete))
        .route("/chats/create", post(chats::create_chat))
        .route("/chats", get(chats::list_chats))
        .route("/chats/{chat_id}", get(chats::get_chat))
        .route("/chats/{chat_id}/local", delete(chats::delete_chat_local))
        .route("/chats/{chat_id}/full", delete(chats::delete_chat_full))
        .route("/chats/{chat_id}/auto-delete", post(chats::set_auto_delete))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Vesper server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.jwt_secret)
    })
}
