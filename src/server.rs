//! Webhook Server
//!
//! Axum server the messaging platform posts inbound messages to:
//! - `POST /callback`: `{identity, text}` → `Response`
//! - `GET /health`: liveness with uptime

use axum::{extract::State, response::Json, routing::get, routing::post, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::command::Dispatcher;
use crate::response::Response;

/// Shared across handlers
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Inbound message from the platform
#[derive(Debug, Clone, Deserialize)]
pub struct Inbound {
    pub identity: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    /// ISO 8601
    pub timestamp: String,
}

async fn callback(State(state): State<Arc<AppState>>, Json(msg): Json<Inbound>) -> Json<Response> {
    Json(state.dispatcher.handle(&msg.identity, &msg.text).await)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version,
        uptime_secs: state.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/callback", post(callback))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl+C or SIGTERM
pub async fn run(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::messenger::NullMessenger;
    use crate::store::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        let dispatcher = Dispatcher::new(
            crate::commands::registry().unwrap(),
            Arc::new(MemoryStore::new()),
            Arc::new(NullMessenger),
            Config::default(),
        );
        Arc::new(AppState::new(dispatcher))
    }

    #[tokio::test]
    async fn test_callback_returns_prompt() {
        let app = router(state());
        let req = Request::post("/callback")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"identity":"u1","text":"create team"}"#))
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        let reply: Response = serde_json::from_slice(&body).unwrap();
        assert_eq!(reply.text, "團隊名稱");
        assert!(reply.choices.is_empty());
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(state());
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
