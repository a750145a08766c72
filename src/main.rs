//! Manuscript OCR - transcribe and normalize historical manuscript scans.

mod chat;
mod config;
mod engines;
mod error;
mod export;
mod input;
mod ocr;
mod pipeline;
mod prompts;
mod session;
mod store;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use config::AppConfig;
use engines::{MistralPipelineFactory, PipelineFactory};
use error::PipelineError;
use export::{markdown_download, ExportKind};
use input::{acquire_from_upload, acquire_from_url, upload_media_type, SourceDocument};
use pipeline::{split_pages, BatchProgress, DocumentResult};
use serde::{Deserialize, Serialize};
use session::SessionRegistry;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    sessions: SessionRegistry,
    pipelines: Arc<dyn PipelineFactory>,
    http: reqwest::Client,
    config: Arc<AppConfig>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "manuscript_ocr=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    info!(
        "Models: ocr={} chat={} (api base {})",
        config.ocr_model, config.chat_model, config.api_base
    );

    let http = reqwest::Client::new();
    let state = AppState {
        sessions: SessionRegistry::new(),
        pipelines: Arc::new(MistralPipelineFactory::new(http.clone(), config.clone())),
        http,
        config: config.clone(),
    };

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/models", get(models))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", delete(end_session))
        .route("/sessions/:id/credential", put(set_credential))
        .route("/sessions/:id/batch", post(submit_batch))
        .route("/sessions/:id/results", get(list_results).delete(clear_results))
        .route("/sessions/:id/results/:name/ocr", get(download_ocr))
        .route("/sessions/:id/results/:name/norm", get(download_norm))
        .route("/sessions/:id/results/:name/pages", get(result_pages))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type HandlerError = (StatusCode, String);

fn session_not_found(id: Uuid) -> HandlerError {
    (StatusCode::NOT_FOUND, format!("Unknown session: {}", id))
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct ModelsResponse {
    ocr_model: String,
    chat_model: String,
}

async fn models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        ocr_model: state.config.ocr_model.clone(),
        chat_model: state.config.chat_model.clone(),
    })
}

#[derive(Serialize, Deserialize)]
struct SessionCreated {
    session_id: Uuid,
}

/// Start a session with an empty result store.
async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionCreated>) {
    let session_id = state.sessions.create();
    info!("Session started: {} ({} active)", session_id, state.sessions.len());
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, HandlerError> {
    if state.sessions.remove(id) {
        info!("Session ended: {}", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(session_not_found(id))
    }
}

#[derive(Deserialize)]
struct CredentialBody {
    api_key: String,
}

/// Attach an API key to the session. Held in memory only.
async fn set_credential(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CredentialBody>,
) -> Result<StatusCode, HandlerError> {
    let api_key = body.api_key.trim();
    if api_key.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "api_key must not be empty".to_string()));
    }

    let session = state.sessions.get(id).ok_or_else(|| session_not_found(id))?;
    session.lock().await.set_credential(api_key);
    info!("Credential set for session {}", id);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize)]
struct Rejected {
    source: String,
    error: String,
}

#[derive(Serialize, Deserialize)]
struct BatchResponse {
    processed: Vec<String>,
    rejected: Vec<Rejected>,
    progress: Vec<BatchProgress>,
}

/// Acquire every `file` and `url` part, then process the documents in order.
///
/// The session is unlocked while parts are read and URLs fetched. It stays
/// locked from the first OCR call to the last normalization, so result reads
/// and clears on the same session wait for the batch to finish.
async fn submit_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<BatchResponse>, HandlerError> {
    let session = state.sessions.get(id).ok_or_else(|| session_not_found(id))?;

    let api_key = session
        .lock()
        .await
        .credential()
        .map(str::to_string)
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, PipelineError::MissingCredential.to_string()))?;

    let mut documents: Vec<SourceDocument> = Vec::new();
    let mut rejected = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("document").to_string();
                let declared = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|e| {
                    (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
                })?;

                match upload_media_type(declared.as_deref(), &file_name) {
                    Some(media_type) => {
                        info!("Received file: {} ({} bytes, {})", file_name, data.len(), media_type);
                        documents.push(acquire_from_upload(file_name, data.to_vec(), media_type));
                    }
                    None => {
                        warn!("Rejected upload {} (type {:?})", file_name, declared);
                        rejected.push(Rejected {
                            error: format!(
                                "Unsupported media type {:?}; expected JPEG, PNG or PDF",
                                declared.unwrap_or_default()
                            ),
                            source: file_name,
                        });
                    }
                }
            }
            Some("url") => {
                let url = field.text().await.map_err(|e| {
                    (StatusCode::BAD_REQUEST, format!("Failed to read url field: {}", e))
                })?;
                let url = url.trim();
                if url.is_empty() {
                    continue;
                }
                match acquire_from_url(&state.http, url, state.config.fetch_timeout).await {
                    Ok(doc) => documents.push(doc),
                    Err(e) => {
                        warn!("{}", e);
                        rejected.push(Rejected {
                            source: url.to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }
            _ => {}
        }
    }

    if documents.is_empty() && rejected.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No documents submitted".to_string()));
    }

    let pipeline = state.pipelines.build(&api_key);
    let mut session = session.lock().await;
    let progress = pipeline
        .process_batch(documents, &mut session.store, |step| {
            info!("Progress {}/{}: {}", step.completed, step.total, step.document);
        })
        .await;

    Ok(Json(BatchResponse {
        processed: progress.iter().map(|p| p.document.clone()).collect(),
        rejected,
        progress,
    }))
}

#[derive(Serialize)]
struct ResultEntry {
    name: String,
    #[serde(flatten)]
    result: DocumentResult,
}

/// All results of the session, in submission order.
async fn list_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ResultEntry>>, HandlerError> {
    let session = state.sessions.get(id).ok_or_else(|| session_not_found(id))?;
    let session = session.lock().await;

    let entries = session
        .store
        .all()
        .map(|(name, result)| ResultEntry {
            name: name.to_string(),
            result: result.clone(),
        })
        .collect();

    Ok(Json(entries))
}

async fn clear_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, HandlerError> {
    let session = state.sessions.get(id).ok_or_else(|| session_not_found(id))?;
    session.lock().await.store.clear();
    info!("Results cleared for session {}", id);
    Ok(StatusCode::NO_CONTENT)
}

async fn find_result(
    state: &AppState,
    id: Uuid,
    name: &str,
) -> Result<DocumentResult, HandlerError> {
    let session = state.sessions.get(id).ok_or_else(|| session_not_found(id))?;
    let session = session.lock().await;
    session
        .store
        .get(name)
        .cloned()
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("No result for document: {}", name)))
}

async fn download_ocr(
    State(state): State<AppState>,
    Path((id, name)): Path<(Uuid, String)>,
) -> Result<Response, HandlerError> {
    let result = find_result(&state, id, &name).await?;
    Ok(markdown_download(&name, &result, ExportKind::Ocr))
}

async fn download_norm(
    State(state): State<AppState>,
    Path((id, name)): Path<(Uuid, String)>,
) -> Result<Response, HandlerError> {
    let result = find_result(&state, id, &name).await?;
    Ok(markdown_download(&name, &result, ExportKind::Norm))
}

#[derive(Serialize, Deserialize)]
struct PageEntry {
    page: usize,
    text: String,
}

/// Raw OCR text split back into pages on the page markers.
async fn result_pages(
    State(state): State<AppState>,
    Path((id, name)): Path<(Uuid, String)>,
) -> Result<Response, HandlerError> {
    let result = find_result(&state, id, &name).await?;
    if let Some(error) = result.error {
        return Ok((StatusCode::CONFLICT, error).into_response());
    }

    let pages: Vec<PageEntry> = split_pages(&result.raw_text)
        .into_iter()
        .map(|(page, text)| PageEntry { page, text })
        .collect();
    Ok(Json(pages).into_response())
}
