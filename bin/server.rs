// Envelope Budget - Web Server
// REST API with Axum over the classifier and allocator

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use envelope_budget::{
    allocate_from, AllocationResult, AppConfig, BudgetError, BudgetMonth, CallerContext,
    CategoryProvider, CategoryRule, ClassificationResult, Classifier, SqliteStore,
};

pub const USER_HEADER: &str = "x-user-id";

/// Shared application state
#[derive(Clone)]
struct AppState {
    classifier: Arc<Classifier<SqliteStore>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Library error → HTTP status + error envelope
struct ApiError(BudgetError);

impl From<BudgetError> for ApiError {
    fn from(e: BudgetError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BudgetError::MissingContext => StatusCode::UNAUTHORIZED,
            BudgetError::RuleNotFound(_) | BudgetError::GroupNotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_precondition() => StatusCode::BAD_REQUEST,
            e => {
                error!(error = %e, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ApiResponse::<()>::err(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

fn caller(headers: &HeaderMap) -> Result<CallerContext, ApiError> {
    let user_id = headers.get(USER_HEADER).and_then(|v| v.to_str().ok());
    Ok(CallerContext::from_optional(user_id)?)
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Deserialize)]
struct ClassifyRequest {
    merchant: String,
}

#[derive(Deserialize)]
struct LearnRequest {
    merchant: String,
    category_id: i64,
}

#[derive(Deserialize)]
struct ReassignRequest {
    category_id: i64,
}

#[derive(Deserialize)]
struct AllocateRequest {
    available_funds: f64,
    #[serde(default)]
    month: Option<BudgetMonth>,
    /// Record the run (funded += allocated) instead of only planning it
    #[serde(default)]
    apply: bool,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/classify - Suggest a category for a merchant
async fn classify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ClassifyRequest>,
) -> ApiResult<Option<ClassificationResult>> {
    let ctx = caller(&headers)?;
    let valid: Vec<_> = state
        .classifier
        .store()
        .categories()?
        .iter()
        .map(|c| c.to_ref())
        .collect();

    let result = state.classifier.classify(&ctx, &req.merchant, &valid)?;
    Ok(Json(ApiResponse::ok(result)))
}

/// POST /api/learn - Confirm a merchant → category assignment
async fn learn(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LearnRequest>,
) -> ApiResult<CategoryRule> {
    let ctx = caller(&headers)?;
    let rule = state.classifier.learn(&ctx, &req.merchant, req.category_id)?;
    Ok(Json(ApiResponse::ok(rule)))
}

/// GET /api/rules - Rules of the caller
async fn list_rules(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<CategoryRule>> {
    let ctx = caller(&headers)?;
    Ok(Json(ApiResponse::ok(state.classifier.list_rules(&ctx)?)))
}

/// POST /api/rules/:id/reassign - Point a rule at another category
async fn reassign_rule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(rule_id): Path<i64>,
    Json(req): Json<ReassignRequest>,
) -> ApiResult<CategoryRule> {
    let ctx = caller(&headers)?;
    let rule = state
        .classifier
        .reassign_rule_category(&ctx, rule_id, req.category_id)?;
    Ok(Json(ApiResponse::ok(rule)))
}

/// POST /api/allocate - Plan (and with `apply`, record) a funding run
async fn allocate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AllocateRequest>,
) -> ApiResult<AllocationResult> {
    caller(&headers)?;
    let store = state.classifier.store();
    let month = req.month.unwrap_or_else(BudgetMonth::current);

    let result = if req.apply {
        store.allocate_and_record(req.available_funds, month)?
    } else {
        allocate_from(store, req.available_funds, month)?
    };
    Ok(Json(ApiResponse::ok(result)))
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/classify", post(classify))
        .route("/learn", post(learn))
        .route("/rules", get(list_rules))
        .route("/rules/:id/reassign", post(reassign_rule))
        .route("/allocate", post(allocate))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))?;
    info!(path = ?config.database_path, "database opened");

    let keywords = config.keyword_table().context("Failed to load keyword table")?;
    let state = AppState {
        classifier: Arc::new(Classifier::with_config(store, keywords, config.classifier.clone())),
    };

    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server_addr))?;

    info!(addr = %config.server_addr, "server running");

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
