// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. The API is read-only apart from the
// manual refresh trigger, and there is no authentication: it serves public
// market data to a local dashboard front-end.
//
// CORS is configured permissively for development; tighten `allow_origin`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::app_state::AppState;
use crate::error::MarketDataError;
use crate::export::SeriesTable;
use crate::market_data::coingecko::MAX_PER_PAGE;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/summary", get(summary))
        .route("/api/v1/markets", get(top_markets))
        .route("/api/v1/assets/:id/charts", get(asset_charts))
        .route("/api/v1/assets/:id/export.csv", get(asset_csv))
        .route("/api/v1/cbbi", get(cbbi))
        .route("/api/v1/cbbi/export.csv", get(cbbi_csv))
        .route("/api/v1/refresh", post(refresh))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Helpers
// =============================================================================

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn upstream_error(err: &MarketDataError) -> Response {
    match err {
        MarketDataError::InvalidRequest(msg) => json_error(StatusCode::BAD_REQUEST, msg.clone()),
        other => json_error(StatusCode::BAD_GATEWAY, other.to_string()),
    }
}

fn csv_response(table: &SeriesTable, filename: &str) -> Response {
    match table.to_csv() {
        Ok(body) => (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{filename}\""),
                ),
            ],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "CSV export failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "CSV export failed")
        }
    }
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health())
}

// =============================================================================
// Summary table
// =============================================================================

async fn summary(State(state): State<Arc<AppState>>) -> Response {
    match state.latest_snapshot() {
        Some(snapshot) => Json(snapshot.as_ref().clone()).into_response(),
        None => json_error(StatusCode::SERVICE_UNAVAILABLE, "no refresh cycle has completed yet"),
    }
}

#[derive(Deserialize)]
struct MarketsQuery {
    per_page: Option<u32>,
    /// Quote currency for this request only, e.g. `eur` or `btc`.
    currency: Option<String>,
}

/// Provider currency codes are short alphanumeric tickers.
fn valid_currency(code: &str) -> bool {
    !code.is_empty() && code.len() <= 10 && code.chars().all(|c| c.is_ascii_alphanumeric())
}

async fn top_markets(State(state): State<Arc<AppState>>, Query(query): Query<MarketsQuery>) -> Response {
    let per_page = query
        .per_page
        .unwrap_or_else(|| state.config.read().top_markets)
        .clamp(1, MAX_PER_PAGE as u32);

    let currency = query.currency.as_deref().map(str::trim).filter(|c| !c.is_empty());
    if let Some(code) = currency {
        if !valid_currency(code) {
            return json_error(StatusCode::BAD_REQUEST, format!("invalid currency '{code}'"));
        }
    }

    match state.top_markets(currency, per_page).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => upstream_error(&e),
    }
}

// =============================================================================
// Per-asset charts and export
// =============================================================================

async fn asset_charts(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.chart_bundle(&id) {
        Some(bundle) => Json(bundle).into_response(),
        None => json_error(StatusCode::NOT_FOUND, format!("no analysis for asset '{id}'")),
    }
}

async fn asset_csv(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.indicator_table(&id) {
        Some(table) => csv_response(&table, &format!("{}.csv", id.to_lowercase())),
        None => json_error(StatusCode::NOT_FOUND, format!("no analysis for asset '{id}'")),
    }
}

// =============================================================================
// CBBI companion view
// =============================================================================

async fn cbbi(State(state): State<Arc<AppState>>) -> Response {
    match state.cbbi().await {
        Some(Ok(report)) => Json(report.summary()).into_response(),
        Some(Err(e)) => upstream_error(&e),
        None => json_error(StatusCode::NOT_FOUND, "CBBI view is disabled"),
    }
}

async fn cbbi_csv(State(state): State<Arc<AppState>>) -> Response {
    match state.cbbi().await {
        Some(Ok(report)) => csv_response(&report.table, "cbbi_series.csv"),
        Some(Err(e)) => upstream_error(&e),
        None => json_error(StatusCode::NOT_FOUND, "CBBI view is disabled"),
    }
}

// =============================================================================
// Manual refresh
// =============================================================================

async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("manual refresh requested via API");
    let snapshot = state.refresh_now().await;
    Json(snapshot.as_ref().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::tests::{state_over, test_state, StaticSource};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn summary_before_first_cycle_is_unavailable() {
        let app = router(Arc::new(test_state(StaticSource::default())));
        let (status, _) = call(app, "GET", "/api/v1/summary").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn refresh_then_summary_and_charts() {
        let state = Arc::new(test_state(StaticSource::default()));

        let (status, body) = call(router(state.clone()), "POST", "/api/v1/refresh").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["rows"].as_array().unwrap().len(), 2);

        let (status, body) = call(router(state.clone()), "GET", "/api/v1/assets/bitcoin/charts").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"rsi14\""));

        let (status, _) = call(router(state), "GET", "/api/v1/assets/dogecoin/charts").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn asset_export_is_csv() {
        let state = Arc::new(test_state(StaticSource::default()));
        state.refresh_now().await;

        let (status, body) = call(router(state), "GET", "/api/v1/assets/sui/export.csv").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("datetime,price,ema9,ema26,rsi14"));
        assert_eq!(body.lines().count(), 31);
    }

    #[tokio::test]
    async fn health_reports_rate_limits() {
        let app = router(Arc::new(test_state(StaticSource::default())));
        let (status, body) = call(app, "GET", "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "starting");
        assert_eq!(json["rate_limits"]["budget_per_minute"], 25);
    }

    #[tokio::test]
    async fn markets_clamps_page_size() {
        let app = router(Arc::new(test_state(StaticSource::default())));
        let (status, body) = call(app, "GET", "/api/v1/markets?per_page=2").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn markets_rows_carry_rsi_and_momentum() {
        let source = Arc::new(StaticSource::default());
        let state = Arc::new(state_over(source.clone()));
        state.config.write().top_markets_history_days = 30;

        let (status, body) = call(router(state), "GET", "/api/v1/markets?per_page=3&currency=EUR").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(source.last_currency.lock().as_deref(), Some("eur"));

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 3);
        for row in rows {
            assert!(row["id"].is_string());
            assert_eq!(row["rsi"], 100.0);
            assert_eq!(row["momentum"], "overbought");
            assert_eq!(row["history_points"], 30);
        }
    }

    #[tokio::test]
    async fn markets_without_enough_history_report_unavailable_rsi() {
        let app = router(Arc::new(test_state(StaticSource::default())));
        let (status, body) = call(app, "GET", "/api/v1/markets?per_page=1").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(json[0]["rsi"].is_null());
        assert_eq!(json[0]["momentum"], "unavailable");
    }

    #[tokio::test]
    async fn markets_rejects_malformed_currency() {
        let app = router(Arc::new(test_state(StaticSource::default())));
        let (status, _) = call(app, "GET", "/api/v1/markets?currency=us%24d").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cbbi_disabled_is_not_found() {
        let app = router(Arc::new(test_state(StaticSource::default())));
        let (status, _) = call(app, "GET", "/api/v1/cbbi").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
