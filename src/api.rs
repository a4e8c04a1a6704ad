//! REST API server for the audit pipeline
//!
//! Exposes one audit endpoint plus read-only metadata endpoints.
//! Integrates with the frontend UI via permissive CORS.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::models::Category;
use crate::pipeline::AuditPipeline;

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditRequest {
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditResponse {
    pub query: String,
    pub category: Category,
    pub audit_report: String,
    pub form_prepared: bool,
    pub final_output: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<AuditPipeline>,
}

/// =============================
/// Metadata Endpoints
/// =============================

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Welcome to the FiscalPulse API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
        "endpoints": {
            "health": "/health",
            "audit": "/audit (POST)",
            "categories": "/categories",
        }
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "FiscalPulse API",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn categories() -> Json<serde_json::Value> {
    let categories: Vec<serde_json::Value> = Category::ALL
        .iter()
        .map(|category| {
            let (description, icon) = match category {
                Category::Database => ("Transaction and ledger queries", "🗄️"),
                Category::Filesystem => ("Policy and document queries", "📁"),
                Category::General => ("General audit questions, no data fetch", "📊"),
            };
            serde_json::json!({
                "name": category.to_string(),
                "description": description,
                "icon": icon,
            })
        })
        .collect();

    Json(serde_json::json!({ "categories": categories }))
}

/// =============================
/// Audit Endpoint
/// =============================

async fn perform_audit(
    State(state): State<ApiState>,
    Json(req): Json<AuditRequest>,
) -> Result<Json<AuditResponse>, (StatusCode, Json<ErrorBody>)> {
    if req.query.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "query must not be empty".to_string(),
            }),
        ));
    }

    info!("Received audit request: {}", req.query);

    match state.pipeline.run(&req.query).await {
        Ok(record) => Ok(Json(AuditResponse {
            query: record.query,
            category: record.category,
            audit_report: record.report,
            form_prepared: record.form_prepared,
            final_output: record.final_output,
        })),
        Err(e) => {
            error!("Audit run failed: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: format!("Audit processing failed: {}", e),
                }),
            ))
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(pipeline: Arc<AuditPipeline>) -> Router {
    let state = ApiState { pipeline };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/categories", get(categories))
        .route("/audit", post(perform_audit))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    pipeline: Arc<AuditPipeline>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(pipeline);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
