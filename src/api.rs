use std::path::PathBuf;

use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    app_state::AppState,
    error::{AppError, Result},
    ingest,
    models::{BatchEntry, UploadRootStatus},
    rag,
    store::StoredFile,
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct SetConfigPayload {
    config_path: PathBuf,
}

#[derive(Deserialize)]
pub struct FilesQuery {
    #[serde(default)]
    path: String,
}

#[derive(Deserialize)]
pub struct SearchPayload {
    query: String,
}

#[derive(Deserialize)]
pub struct SummarizePayload {
    filename: String,
    #[serde(default, rename = "currentPath")]
    current_path: Option<String>,
}

#[derive(Serialize)]
pub struct SearchResult {
    name: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    status: crate::app_state::Status,
    index_records: Option<usize>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    let body_limit = app_state.config.max_upload_bytes;
    Router::new()
        .route("/set-config", post(set_config_handler))
        .route("/config", get(config_handler))
        .route("/upload", post(upload_handler))
        .route("/upload-folder", post(upload_folder_handler))
        .route("/download/*path", get(download_handler))
        .route("/delete/*path", delete(delete_handler))
        .route("/files", get(list_files_handler))
        .route("/api/search", post(search_handler))
        .route("/api/search_assistant", post(search_assistant_handler))
        .route("/api/summarize", post(summarize_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(app_state)
}

// --- Handlers de configuración ---

#[axum::debug_handler]
async fn set_config_handler(
    State(state): State<AppState>,
    Json(payload): Json<SetConfigPayload>,
) -> Result<Json<Value>> {
    let upload_dir = state.store.configure_from_file(&payload.config_path).await?;
    Ok(Json(json!({ "status": "success", "upload_dir": upload_dir })))
}

#[axum::debug_handler]
async fn config_handler(State(state): State<AppState>) -> Json<UploadRootStatus> {
    Json(state.store.status().await)
}

// --- Handlers de ficheros ---

#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>> {
    let (entries, prefix) = read_multipart(multipart).await?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| AppError::InvalidRequest("no file in request".to_string()))?;

    let relative = join_relative(&prefix, &entry.relative_path);
    let stored = state.store.upload(&relative, &entry.bytes).await?;
    info!("Fichero subido: {}", stored.relative_path);

    let filename = stored.relative_path.clone();
    schedule_ingestion(&state, vec![stored]);
    Ok(Json(json!({ "filename": filename, "status": "success" })))
}

#[axum::debug_handler]
async fn upload_folder_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>> {
    let (entries, prefix) = read_multipart(multipart).await?;
    if entries.is_empty() {
        return Err(AppError::InvalidRequest("no files in request".to_string()));
    }

    let outcomes = state.store.upload_batch(entries, &prefix).await?;
    let stored: Vec<StoredFile> = outcomes
        .iter()
        .filter(|o| o.succeeded())
        .filter_map(|o| match (&o.path, &o.absolute_path) {
            (Some(relative_path), Some(absolute_path)) => Some(StoredFile {
                relative_path: relative_path.clone(),
                absolute_path: absolute_path.clone(),
            }),
            _ => None,
        })
        .collect();
    info!(
        "Carpeta subida: {} de {} ficheros guardados",
        stored.len(),
        outcomes.len()
    );

    schedule_ingestion(&state, stored);
    Ok(Json(json!({ "files": outcomes })))
}

#[axum::debug_handler]
async fn download_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response> {
    let (name, bytes) = state.store.download(&path).await?;
    let mime = mime_guess::from_path(&name).first_or_octet_stream();
    let filename = name.rsplit('/').next().unwrap_or(&name).replace('"', "_");

    Ok((
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

#[axum::debug_handler]
async fn delete_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<Value>> {
    let name = state.store.delete(&path).await?;

    if let Some(index) = &state.index {
        match index.retract(&name).await {
            Ok(removed) => debug!("Retirados {removed} registros del índice para {name}"),
            Err(e) => warn!("No se pudo retirar {name} del índice: {e}"),
        }
    }

    Ok(Json(json!({ "status": "success", "message": format!("{name} deleted") })))
}

#[axum::debug_handler]
async fn list_files_handler(
    State(state): State<AppState>,
    Query(query): Query<FilesQuery>,
) -> Result<Json<Value>> {
    let entries = state.store.list(&query.path).await?;
    Ok(Json(json!({ "entries": entries })))
}

// --- Handlers de búsqueda semántica ---

#[axum::debug_handler]
async fn search_handler(
    State(state): State<AppState>,
    Json(payload): Json<SearchPayload>,
) -> Result<Json<Value>> {
    let names = rag::search(state.index()?, &payload.query).await?;
    let results: Vec<SearchResult> = names.into_iter().map(|name| SearchResult { name }).collect();
    Ok(Json(json!({ "results": results })))
}

#[axum::debug_handler]
async fn search_assistant_handler(
    State(state): State<AppState>,
    Json(payload): Json<SearchPayload>,
) -> Result<Json<Value>> {
    let answer = rag::answer(
        state.index()?,
        state.generator()?,
        state.config.provider_timeout,
        &payload.query,
    )
    .await?;
    Ok(Json(json!({ "results": [answer] })))
}

#[axum::debug_handler]
async fn summarize_handler(
    State(state): State<AppState>,
    Json(payload): Json<SummarizePayload>,
) -> Result<Json<Value>> {
    let relative = join_relative(
        payload.current_path.as_deref().unwrap_or(""),
        &payload.filename,
    );
    let summary = rag::summarize(
        &state.store,
        state.generator()?,
        state.config.provider_timeout,
        &relative,
    )
    .await?;
    Ok(Json(json!({ "summary": summary })))
}

// --- Estado, Apagado y Utilidades ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.status.lock().unwrap().clone();
    let index_records = match &state.index {
        Some(index) => Some(index.len().await),
        None => None,
    };
    Json(StatusResponse {
        status,
        index_records,
    })
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

/// Lee los ficheros (campos con nombre de fichero) y el prefijo opcional `path`.
async fn read_multipart(mut multipart: Multipart) -> Result<(Vec<BatchEntry>, String)> {
    let mut entries = Vec::new();
    let mut prefix = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::InvalidRequest(e.to_string()))?;
                entries.push(BatchEntry {
                    relative_path: file_name,
                    bytes: bytes.to_vec(),
                });
            }
            None if field_name == "path" => {
                prefix = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidRequest(e.to_string()))?;
            }
            None => debug!("Campo multipart ignorado: {field_name}"),
        }
    }

    Ok((entries, prefix))
}

fn join_relative(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches(|c| c == '/' || c == '\\');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

fn schedule_ingestion(state: &AppState, files: Vec<StoredFile>) {
    if files.is_empty() {
        return;
    }
    match &state.index {
        Some(index) => {
            ingest::spawn_ingestion(index.clone(), state.status.clone(), files);
        }
        None => debug!(
            "Índice semántico no inicializado; {} ficheros sin indexar",
            files.len()
        ),
    }
}
