use std::path::PathBuf;
use std::sync::Arc;

use app_config::types::ServerSettings;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use core_types::{EquityPoint, Signal};
use engine::SharedSnapshot;
use storage::DerivedStore;
use tokio::net::TcpListener;

pub mod error;
pub mod types;

// Re-export our custom error type for convenience.
pub use error::{Error, Result};
use types::{RecentParams, StatusResponse};

/// The shared application state that is available to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub snapshot: SharedSnapshot,
    pub chart_path: PathBuf,
    /// Present when the storage backend persists signals; lets the recent
    /// endpoint reach past what the in-memory snapshot retains.
    pub signals: Option<Arc<dyn DerivedStore>>,
}

/// Creates the main application router with all routes and middleware.
pub fn create_router(app_state: AppState) -> Router {
    // Allow any origin for the development dashboard.
    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let api_router = Router::new()
        .route("/status", get(get_status_handler))
        .route("/equity-curve", get(get_equity_curve_handler))
        .route("/signals/recent", get(get_recent_signals_handler));

    Router::new()
        .route("/health", get(health_check_handler))
        .route("/chart.png", get(get_chart_handler))
        .nest("/api", api_router)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// A simple health check handler.
async fn health_check_handler() -> &'static str {
    "OK"
}

/// Handler for `GET /api/status`.
async fn get_status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let snap = state.snapshot.read().await;
    Json(StatusResponse {
        symbol: snap.symbol.clone(),
        timeframe: snap.timeframe,
        last_candle_time: snap.last_candle_time,
        last_signal: snap.last_signal.clone(),
        final_cumulative: snap.final_cumulative,
        last_cycle_at: snap.last_cycle_at,
        last_error: snap.last_error.clone(),
    })
}

/// Handler for `GET /api/equity-curve`. Empty before the first completed
/// cycle; the dashboard treats that as "warming up", not an error.
async fn get_equity_curve_handler(State(state): State<AppState>) -> Json<Vec<EquityPoint>> {
    let snap = state.snapshot.read().await;
    Json(snap.equity_curve.clone())
}

/// Handler for `GET /api/signals/recent?limit=N`. Served from the signal
/// table when the backend has one, otherwise from the snapshot's tail.
async fn get_recent_signals_handler(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Json<Vec<Signal>> {
    if let Some(store) = &state.signals {
        let symbol = state.snapshot.read().await.symbol.clone();
        match store.recent_signals(&symbol, params.limit).await {
            Ok(signals) => return Json(signals),
            Err(e) => {
                tracing::warn!(error = %e, "Signal query failed; serving the snapshot tail.");
            }
        }
    }

    let snap = state.snapshot.read().await;
    let signals = &snap.recent_signals;
    let tail_start = signals.len().saturating_sub(params.limit);
    Json(signals[tail_start..].to_vec())
}

/// Handler for `GET /chart.png`: serves the last rendered chart file.
async fn get_chart_handler(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let bytes = tokio::fs::read(&state.chart_path)
        .await
        .map_err(|_| Error::NotFound("no chart rendered yet".to_string()))?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}

/// The main entry point for running the web server.
///
/// This function sets up the TCP listener and serves the application router.
/// It will run until the process is terminated.
pub async fn run(settings: ServerSettings, app_state: AppState) -> Result<()> {
    let app = create_router(app_state);

    let address = format!("{}:{}", settings.host, settings.port);
    tracing::info!("Web server listening on {}", address);

    let listener = TcpListener::bind(&address)
        .await
        .map_err(Error::ServerBindError)?;

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use core_types::{Symbol, Timeframe};
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState {
            snapshot: engine::snapshot::shared(Symbol("BTCUSDT".to_string()), Timeframe::M1),
            chart_path: PathBuf::from("does/not/exist.png"),
            signals: None,
        }
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = create_router(state());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_is_served_before_first_cycle() {
        let app = create_router(state());
        let response = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn equity_curve_is_empty_before_first_cycle() {
        let app = create_router(state());
        let response = app
            .oneshot(
                Request::get("/api/equity-curve")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_chart_is_not_found() {
        let app = create_router(state());
        let response = app
            .oneshot(Request::get("/chart.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn recent_signals_respects_limit() {
        let app_state = state();
        {
            let mut snap = app_state.snapshot.write().await;
            snap.recent_signals = (0..5)
                .map(|i| Signal {
                    symbol: Symbol("BTCUSDT".to_string()),
                    open_time: i * 60_000,
                    direction: core_types::Direction::Buy,
                    confidence: 1.0,
                    price: rust_decimal::Decimal::from(100),
                })
                .collect();
        }
        let app = create_router(app_state);
        let response = app
            .oneshot(
                Request::get("/api/signals/recent?limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
