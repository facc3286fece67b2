//! HTTP surface: guarded dashboard endpoints, the change webhook, health.

pub mod guard;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::aggregator::AggregatorHandle;
use crate::hub::{ChangeEvent, ChangeHub};
use crate::model::Filter;

/// Header a database webhook sends its shared secret in.
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<AggregatorHandle>,
    pub hub: ChangeHub,
    /// `None` disables the change webhook.
    pub webhook_secret: Option<Arc<str>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub city: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/login", get(handle_login))
        .route("/dashboard/kpis", get(handle_kpis))
        .route("/dashboard/stations", get(handle_stations))
        .route("/dashboard/filter", post(handle_filter))
        .route("/hooks/changes", post(handle_change))
        .fallback(handle_not_found)
        .layer(middleware::from_fn(guard::require_session))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "API server listening");
    if state.webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET is not set; change notifications will be refused");
    }

    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "emobility_pulse",
    }))
}

async fn handle_login() -> &'static str {
    "login required"
}

async fn handle_not_found() -> ApiError {
    api_error(StatusCode::NOT_FOUND, "not found")
}

async fn handle_kpis(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dashboard.state())
}

async fn handle_stations(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dashboard.state().stations)
}

async fn handle_filter(
    State(state): State<AppState>,
    Json(input): Json<FilterRequest>,
) -> Result<(StatusCode, Json<Filter>), ApiError> {
    let filter = Filter::new(input.city, input.start, input.end)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    state
        .dashboard
        .set_filter(filter.clone())
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    Ok((StatusCode::ACCEPTED, Json(filter)))
}

async fn handle_change(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Some(secret) = state.webhook_secret.as_deref() else {
        return Err(api_error(StatusCode::FORBIDDEN, "change webhook is disabled"));
    };
    let presented = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if presented != Some(secret) {
        warn!("Rejected change payload with a missing or wrong secret");
        return Err(api_error(StatusCode::UNAUTHORIZED, "invalid webhook secret"));
    }

    let event: ChangeEvent = serde_json::from_value(payload).map_err(|e| {
        warn!(error = %e, "Rejected change payload");
        api_error(StatusCode::BAD_REQUEST, e.to_string())
    })?;

    let delivered = state.hub.publish(event);
    Ok((StatusCode::ACCEPTED, Json(json!({ "delivered": delivered }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{Aggregator, LoadStatus};
    use crate::sources::SimulatedSource;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use std::time::Duration;
    use tower::ServiceExt;

    fn filter(city: &str) -> Filter {
        Filter::new(
            city,
            NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 7, 10).unwrap(),
        )
        .unwrap()
    }

    fn app_state() -> AppState {
        let source = Arc::new(SimulatedSource::seeded(Duration::from_secs(3600), 1));
        let dashboard = Aggregator::new(source).spawn(filter("Indore"));
        AppState {
            dashboard: Arc::new(dashboard),
            hub: ChangeHub::default(),
            webhook_secret: Some(Arc::from("hook-secret")),
        }
    }

    fn change(body: &'static str, secret: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/hooks/changes")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(secret) = secret {
            builder = builder.header(WEBHOOK_SECRET_HEADER, secret);
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn authed(method: &str, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, "sb-access-token=token")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unauthenticated_dashboard_redirects() {
        let app = router(app_state());
        let resp = app
            .oneshot(Request::builder().uri("/dashboard/reports").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            resp.headers()[header::LOCATION],
            "/login?redirectedFrom=%2Fdashboard%2Freports"
        );
    }

    #[tokio::test]
    async fn test_authenticated_unknown_dashboard_path_is_not_found() {
        let resp = router(app_state())
            .oneshot(authed("GET", "/dashboard/reports", Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = router(app_state());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_authenticated_kpis() {
        let state = app_state();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.dashboard.wait_until(|s| s.status == LoadStatus::Loaded),
        )
        .await
        .unwrap()
        .unwrap();

        let resp = router(state)
            .oneshot(authed("GET", "/dashboard/kpis", Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["kpis"]["total_evs"], 3000);
        assert_eq!(json["kpis"]["avg_util"], 45);
        assert_eq!(json["status"]["state"], "loaded");
        assert_eq!(json["filter"]["city"], "Indore");
    }

    #[tokio::test]
    async fn test_filter_rejects_inverted_range() {
        let body = Body::from(r#"{"city": "Bhopal", "start": "2024-07-10", "end": "2024-07-01"}"#);
        let resp = router(app_state())
            .oneshot(authed("POST", "/dashboard/filter", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_filter_switches_city() {
        let state = app_state();
        let body = Body::from(r#"{"city": "Bhopal", "start": "2024-07-01", "end": "2024-07-10"}"#);
        let resp = router(state.clone())
            .oneshot(authed("POST", "/dashboard/filter", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let loaded = tokio::time::timeout(
            Duration::from_secs(2),
            state.dashboard.wait_until(|s| {
                s.status == LoadStatus::Loaded
                    && s.filter.as_ref().map(|f| f.city.as_str()) == Some("Bhopal")
            }),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(loaded.stations.len(), 2);
        assert_eq!(loaded.kpis.avg_util, 71);
    }

    #[tokio::test]
    async fn test_change_webhook() {
        let state = app_state();
        let mut changes = state.hub.subscribe();

        let body = r#"{"type": "UPDATE", "table": "stations", "schema": "public", "record": {"id": "ind-1"}}"#;
        let resp = router(state.clone())
            .oneshot(change(body, Some("hook-secret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await["delivered"], 1);
        assert_eq!(changes.recv().await.unwrap().table, crate::hub::Table::Stations);

        let body = r#"{"type": "UPDATE", "table": "parking_zones"}"#;
        let resp = router(state)
            .oneshot(change(body, Some("hook-secret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_change_webhook_requires_secret() {
        let state = app_state();
        let mut changes = state.hub.subscribe();
        let body = r#"{"type": "INSERT", "table": "swaps_log"}"#;

        let resp = router(state.clone()).oneshot(change(body, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = router(state.clone())
            .oneshot(change(body, Some("guess")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(changes.try_recv().is_err());

        let disabled = AppState {
            webhook_secret: None,
            ..state
        };
        let resp = router(disabled)
            .oneshot(change(body, Some("hook-secret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
