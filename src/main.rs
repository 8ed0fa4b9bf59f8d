//! Fleet Importer - bulk master-data upload validation server.

mod config;
mod directory;
mod pipeline;
mod relational;
mod report;
mod rules;
mod structure;
mod validator;
mod workbook;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use config::{TemplateStore, UploadTemplate};
use directory::{ContactDirectory, MemoryDirectory, SupabaseDirectory};
use pipeline::{ImportPipeline, UploadError};
use report::ErrorKind;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    templates: Arc<TemplateStore>,
    pipeline: Arc<ImportPipeline>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "fleet_importer=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Built-in templates, plus JSON overrides when TEMPLATE_DIR is set
    let templates = TemplateStore::with_builtin();
    if let Ok(dir) = std::env::var("TEMPLATE_DIR") {
        templates.load_from_dir(std::path::Path::new(&dir))?;
    }
    info!("Loaded {} templates: {:?}", templates.list().len(), templates.list());

    // Duplicate lookups go to Supabase when configured, otherwise to an
    // empty in-memory directory (local runs still validate everything else).
    let directory: Arc<dyn ContactDirectory> = match SupabaseDirectory::from_env() {
        Ok(d) => Arc::new(d),
        Err(e) => {
            warn!("Supabase directory not configured ({}); using in-memory directory", e);
            Arc::new(MemoryDirectory::new())
        }
    };
    info!("Contact directory: {}", directory.name());

    // Build application state
    let state = AppState {
        templates: Arc::new(templates),
        pipeline: Arc::new(ImportPipeline::new(directory)),
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health))
        .route("/templates", get(list_templates))
        .route("/templates/:name", get(get_template))
        .route("/validate/:template", post(validate_upload))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024)) // 50MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Run server
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// List available upload templates.
async fn list_templates(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.templates.list())
}

/// Get a specific upload template.
async fn get_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<UploadTemplate>, StatusCode> {
    state
        .templates
        .get(&name)
        .map(|t| Json(t.template))
        .ok_or(StatusCode::NOT_FOUND)
}

/// Upload a workbook and validate it against a template.
///
/// Per-entity failures come back inside the report; whole-batch failures
/// (unreadable workbook, missing sheets/columns) come back as
/// `success: false` with the top-level error kind, before any per-row table
/// should be rendered.
async fn validate_upload(
    State(state): State<AppState>,
    Path(template_name): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let template = state.templates.get(&template_name).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!(
                "Unknown template: {}. Available: {:?}",
                template_name,
                state.templates.list()
            ),
        )
    })?;

    // Read the uploaded file
    let mut filename = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("upload.xlsx").to_string();
            file_data = field
                .bytes()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e)))?
                .to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()));
    }

    info!(
        "Received file: {} ({} bytes) for template: {}",
        filename,
        file_data.len(),
        template_name
    );

    match state.pipeline.validate(&filename, &file_data, &template).await {
        Ok(report) => Ok(Json(json!({
            "success": true,
            "upload_id": format!("up_{}", uuid::Uuid::new_v4().simple()),
            "received_at": chrono::Utc::now().to_rfc3339(),
            "report": report,
        }))),
        Err(UploadError::Parse(message)) => Ok(Json(json!({
            "success": false,
            "error": ErrorKind::Parse.as_str(),
            "message": message,
        }))),
        Err(UploadError::Structure(errors)) => Ok(Json(json!({
            "success": false,
            "error": ErrorKind::StructureValidationFailed.as_str(),
            "errors": errors,
        }))),
        Err(UploadError::Directory(e)) => {
            error!("Duplicate lookup failed: {:#}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Duplicate lookup failed: {}", e),
            ))
        }
    }
}
