use crate::auth::require_bearer;
use crate::metrics::{metrics_middleware, render_metrics};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde_json::{Value as JsonValue, json};
use tower::ServiceExt;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use webfront_common::models::{CertificateStatus, LoginRequest, TokenResponse};
use webfront_common::{Site, SitePayload, WebfrontError};

type ApiResult<T> = std::result::Result<T, WebfrontError>;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/sites", get(list_sites).post(create_site))
        .route(
            "/api/v1/sites/{id}",
            get(get_site).put(update_site).delete(delete_site),
        )
        .route(
            "/api/v1/sites/{id}/cert",
            post(request_certificate).get(certificate_status),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/login", post(login))
        .route("/api/v1/metrics", get(metrics))
        .merge(protected)
        .fallback(spa_fallback)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<JsonValue> {
    Json(json!({"status": "ok"}))
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    Ok(Json(state.auth.login(&payload.username, &payload.password)?))
}

async fn metrics() -> Response {
    render_metrics()
}

async fn list_sites(State(state): State<AppState>) -> Json<Vec<Site>> {
    Json(state.sites.list().await)
}

async fn create_site(
    State(state): State<AppState>,
    Json(payload): Json<SitePayload>,
) -> ApiResult<(StatusCode, Json<Site>)> {
    let site = state.sites.create(payload).await?;
    Ok((StatusCode::CREATED, Json(site)))
}

async fn get_site(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Site>> {
    Ok(Json(state.sites.get(id).await?))
}

async fn update_site(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SitePayload>,
) -> ApiResult<Json<Site>> {
    Ok(Json(state.sites.update(id, payload).await?))
}

async fn delete_site(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.sites.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn request_certificate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.sites.request_certificate(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn certificate_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CertificateStatus>> {
    Ok(Json(state.sites.certificate_status(id).await?))
}

/// Built frontend with `index.html` as the SPA fallback. Unknown API paths stay JSON 404s.
async fn spa_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path.starts_with("/api/") || path == "/health" {
        return WebfrontError::not_found(format!("route {}", path)).into_response();
    }

    let index = state.static_dir.join("index.html");
    let static_files = ServeDir::new(&state.static_dir).fallback(ServeFile::new(index));
    match static_files.oneshot(req).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}
