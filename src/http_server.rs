/// HTTP Server Module
///
/// Provides the JSON control API the dashboard uses to drive automation:
/// start/stop, approvals, conflict checks, timing optimisation and feedback.

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::conflicts::ConflictChecker;
use crate::content::{check_messaging_consistency, optimal_posting_time};
use crate::error::AutomationError;
use crate::models::{Platform, TrainingFeedback};
use crate::profile::ChildAccountProfile;
use crate::scheduler::{Scheduler, StartAutomationRequest};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub scheduler: Arc<Scheduler>,
    pub conflicts: Arc<ConflictChecker>,
}

impl AppState {
    pub fn new(config: Config, scheduler: Arc<Scheduler>) -> Self {
        let conflicts = Arc::new(ConflictChecker::new(scheduler.store()));
        Self {
            config,
            scheduler,
            conflicts,
        }
    }
}

type ApiError = (StatusCode, Json<serde_json::Value>);
type ApiResult = Result<Json<serde_json::Value>, ApiError>;

fn error_response(e: AutomationError) -> ApiError {
    let status = match &e {
        AutomationError::Validation(_) => StatusCode::BAD_REQUEST,
        AutomationError::UnknownPost(_)
        | AutomationError::UnknownAccount(_)
        | AutomationError::NoPendingPosts(_) => StatusCode::NOT_FOUND,
        AutomationError::InvalidTransition { .. } => StatusCode::CONFLICT,
        AutomationError::Upstream(_) => StatusCode::BAD_GATEWAY,
    };

    if status.is_server_error() {
        log::error!("Request failed: {}", e);
    } else {
        log::debug!("Request rejected: {}", e);
    }

    (
        status,
        Json(serde_json::json!({
            "status": "error",
            "error": e.to_string()
        })),
    )
}

/// Check the bearer token if DASHBOARD_API_SECRET is set
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(secret) = &state.config.dashboard_api_secret else {
        return Ok(());
    };

    let token = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match token {
        Some(token) if token == secret.as_str() => Ok(()),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "status": "error",
                "error": "missing or invalid bearer token"
            })),
        )),
    }
}

/// Create and configure the HTTP server router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/accounts/:id/automation",
            post(start_automation_endpoint)
                .delete(stop_automation_endpoint)
                .get(automation_state_endpoint),
        )
        .route("/accounts/:id/posts", get(list_posts_endpoint))
        .route("/accounts/:id/posts/pending", delete(cancel_pending_endpoint))
        .route("/posts/:id/approve", post(approve_post_endpoint))
        .route("/accounts/:id/conflicts", get(conflicts_endpoint))
        .route("/accounts/:id/optimize", post(optimize_endpoint))
        .route(
            "/accounts/:id/feedback",
            post(feedback_endpoint).get(feedback_history_endpoint),
        )
        .route("/accounts/:id/ai-params", get(ai_params_endpoint))
        .route("/accounts/:id/consistency", get(consistency_endpoint))
        .route(
            "/accounts/:id/profile",
            get(get_profile_endpoint).put(set_profile_endpoint),
        )
        .route("/platforms/:platform/optimal-time", get(optimal_time_endpoint))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> ApiResult {
    Ok(Json(serde_json::json!({
        "status": "ok",
        "service": "child_account_scheduler",
        "tickerRunning": state.scheduler.ticker_running().await,
        "timestamp": Utc::now().to_rfc3339()
    })))
}

async fn start_automation_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
    Json(request): Json<StartAutomationRequest>,
) -> ApiResult {
    authorize(&state, &headers)?;

    let automation = state
        .scheduler
        .start_automation(&account_id, request)
        .await
        .map_err(error_response)?;
    let posts = state.scheduler.posts_for_account(&account_id).await;

    Ok(Json(serde_json::json!({
        "status": "started",
        "automation": automation,
        "posts": posts
    })))
}

async fn stop_automation_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
) -> ApiResult {
    authorize(&state, &headers)?;

    let removed = state
        .scheduler
        .stop_automation(&account_id)
        .await
        .map_err(error_response)?;

    Ok(Json(serde_json::json!({
        "status": "stopped",
        "postsRemoved": removed
    })))
}

async fn automation_state_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
) -> ApiResult {
    authorize(&state, &headers)?;

    let automation = state
        .scheduler
        .automation_state(&account_id)
        .await
        .ok_or_else(|| error_response(AutomationError::UnknownAccount(account_id.clone())))?;

    Ok(Json(serde_json::json!({ "automation": automation })))
}

async fn list_posts_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
) -> ApiResult {
    authorize(&state, &headers)?;

    let posts = state.scheduler.posts_for_account(&account_id).await;
    Ok(Json(serde_json::json!({ "posts": posts })))
}

async fn cancel_pending_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
) -> ApiResult {
    authorize(&state, &headers)?;

    let cancelled = state
        .scheduler
        .cancel_pending_posts(&account_id)
        .await
        .map_err(error_response)?;

    Ok(Json(serde_json::json!({ "cancelled": cancelled })))
}

async fn approve_post_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> ApiResult {
    authorize(&state, &headers)?;

    let post = state
        .scheduler
        .approve_post(&post_id)
        .await
        .map_err(error_response)?;

    Ok(Json(serde_json::json!({ "post": post })))
}

async fn conflicts_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
) -> ApiResult {
    authorize(&state, &headers)?;

    let conflicts = state
        .conflicts
        .check_cross_platform_conflicts(&account_id)
        .await;

    Ok(Json(serde_json::json!({
        "hasConflicts": !conflicts.is_empty(),
        "conflicts": conflicts
    })))
}

async fn optimize_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
) -> ApiResult {
    authorize(&state, &headers)?;

    let posts = state
        .conflicts
        .optimize_post_timing(&account_id, Utc::now())
        .await;

    Ok(Json(serde_json::json!({ "posts": posts })))
}

#[derive(Debug, Deserialize)]
struct FeedbackRequest {
    platform: Platform,
    feedback: TrainingFeedback,
}

async fn feedback_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult {
    authorize(&state, &headers)?;

    let params = state
        .scheduler
        .submit_training_feedback(&account_id, request.platform, request.feedback)
        .await
        .map_err(error_response)?;

    Ok(Json(serde_json::json!({
        "status": "recorded",
        "appliedParams": params
    })))
}

async fn feedback_history_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
) -> ApiResult {
    authorize(&state, &headers)?;

    let history = state.scheduler.feedback_history(&account_id).await;
    Ok(Json(serde_json::json!({ "feedback": history })))
}

async fn ai_params_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
) -> ApiResult {
    authorize(&state, &headers)?;

    let params = state
        .scheduler
        .adjusted_ai_params(&account_id)
        .await
        .map_err(error_response)?;

    Ok(Json(serde_json::json!({ "params": params })))
}

async fn consistency_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
) -> ApiResult {
    authorize(&state, &headers)?;

    let contents: Vec<_> = state
        .scheduler
        .posts_for_account(&account_id)
        .await
        .into_iter()
        .filter(|p| p.status.is_open())
        .map(|p| p.content)
        .collect();

    let issues = check_messaging_consistency(
        &contents,
        state.config.messaging_day_grouping,
        Utc::now(),
    );

    Ok(Json(serde_json::json!({
        "consistent": issues.is_empty(),
        "issues": issues
    })))
}

async fn get_profile_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
) -> ApiResult {
    authorize(&state, &headers)?;

    let profile = state
        .scheduler
        .profile(&account_id)
        .await
        .map_err(error_response)?;

    Ok(Json(serde_json::json!({ "profile": profile })))
}

async fn set_profile_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
    Json(mut profile): Json<ChildAccountProfile>,
) -> ApiResult {
    authorize(&state, &headers)?;

    profile.account_id = account_id;
    state
        .scheduler
        .set_profile(profile.clone())
        .await
        .map_err(error_response)?;

    Ok(Json(serde_json::json!({ "profile": profile })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptimalTimeQuery {
    account_id: Option<String>,
}

async fn optimal_time_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(platform): Path<String>,
    Query(query): Query<OptimalTimeQuery>,
) -> ApiResult {
    authorize(&state, &headers)?;

    let platform: Platform = platform.parse().map_err(error_response)?;

    let existing: Vec<DateTime<Utc>> = match &query.account_id {
        Some(account_id) => state
            .scheduler
            .posts_for_account(account_id)
            .await
            .into_iter()
            .filter(|p| p.platform == platform && p.status.is_open())
            .map(|p| p.scheduled_time)
            .collect(),
        None => Vec::new(),
    };

    let slot = optimal_posting_time(platform, &existing, Utc::now());

    Ok(Json(serde_json::json!({
        "platform": platform,
        "found": slot.is_some(),
        "scheduledTime": slot.map(|t| t.to_rfc3339())
    })))
}

/// Start the HTTP server
pub async fn start_server(state: AppState, port: u16) -> Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .context("Failed to bind HTTP server")?;

    log::info!("HTTP server listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl+C: {}", e);
            }
            log::info!("Shutdown signal received");
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}
