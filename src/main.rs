use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use dotenv::dotenv;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use admission_control::{
    init_logging, Admission, AdmissionConfig, ApiKeyPrincipal, Decision, Principal, Scope,
};

const API_KEY_HEADER: &str = "x-api-key";

/// Keys the demo accepts in `x-api-key`
type ApiKeys = Arc<HashSet<String>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();

    let config = AdmissionConfig::from_env()?;
    let bind_addr = config.bind_addr.clone();
    let admission = Admission::from_config(config).await?;
    let reaper = admission.spawn_reaper();

    let api_keys = demo_api_keys();
    info!(count = api_keys.len(), "Loaded demo API keys");

    let app = router(&admission, api_keys)?;
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Admission demo listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(reaper) = reaper {
        reaper.shutdown().await;
    }
    info!("Admission demo stopped");
    Ok(())
}

/// Comma-separated `ADMISSION_DEMO_API_KEYS`; empty when unset
fn demo_api_keys() -> ApiKeys {
    let keys = std::env::var("ADMISSION_DEMO_API_KEYS")
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Arc::new(keys)
}

fn router(admission: &Admission, api_keys: ApiKeys) -> admission_control::Result<Router> {
    let login_routes = admission.limit_router(
        Router::new().route("/auth/login", post(login)),
        Scope::AuthLogin.as_str(),
    )?;
    let time_entry_routes = admission.limit_router(
        Router::new().route(
            "/api/time-entries",
            get(list_time_entries).post(create_time_entry),
        ),
        Scope::ApiTimeEntries.as_str(),
    )?;
    let export_routes = admission.limit_router(
        Router::new().route("/api/export", get(export)),
        Scope::ApiExport.as_str(),
    )?;
    let operator_routes = Router::new()
        .route("/metrics", get(metrics))
        .with_state(admission.clone());

    // Authentication runs first, so admission sees the principal
    Ok(Router::new()
        .merge(login_routes)
        .merge(time_entry_routes)
        .merge(export_routes)
        .merge(operator_routes)
        .layer(from_fn_with_state(api_keys, authenticate)))
}

/// Stand-in for the real authentication layer. `Authorization: Bearer <user id>`
/// becomes a [`Principal`] without verification; an `x-api-key` becomes an
/// [`ApiKeyPrincipal`] only if it is one of the configured keys.
async fn authenticate(
    State(api_keys): State<ApiKeys>,
    mut request: Request,
    next: Next,
) -> Response {
    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| api_keys.contains(*key))
        .map(str::to_string);
    if let Some(key) = api_key {
        request.extensions_mut().insert(ApiKeyPrincipal(key));
    }

    let user = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    if let Some(user) = user {
        request.extensions_mut().insert(Principal(user));
    }
    next.run(request).await
}

async fn login() -> impl IntoResponse {
    Json(serde_json::json!({ "token": "demo" }))
}

/// Callers with a verified API key are admitted without a user principal
fn caller_name(principal: Option<Extension<Principal>>) -> String {
    principal
        .map(|Extension(Principal(user))| user)
        .unwrap_or_else(|| "service".to_string())
}

async fn list_time_entries(
    principal: Option<Extension<Principal>>,
    Extension(decision): Extension<Decision>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "user": caller_name(principal),
        "entries": [],
        "remaining": decision.remaining,
    }))
}

async fn create_time_entry(principal: Option<Extension<Principal>>) -> impl IntoResponse {
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "user": caller_name(principal), "created": true })),
    )
}

async fn export(principal: Option<Extension<Principal>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/csv")],
        format!("user,hours\n{},0\n", caller_name(principal)),
    )
}

async fn metrics(State(admission): State<Admission>) -> Response {
    match admission.metrics().render() {
        Ok(body) => body.into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
