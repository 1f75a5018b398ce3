use std::sync::PoisonError;
use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::{
    app_state::{AppState, BusyGuard, Status},
    error::{ErrorKind, PipelineError},
    ingest::{self, DocumentSource, IngestContext},
    models::{DocumentTree, LoadedDocument, QuestionOutcome},
    rag::{self, QuestionPhase},
};

/// Tamaño máximo de un PDF subido.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct AskPayload {
    question: String,
}

#[derive(Serialize)]
pub struct DocumentView {
    doc_id: String,
    display_name: String,
    stored_path: String,
    node_count: usize,
    tree: DocumentTree,
}

impl From<&LoadedDocument> for DocumentView {
    fn from(doc: &LoadedDocument) -> Self {
        Self {
            doc_id: doc.doc_id.clone(),
            display_name: doc.display_name.clone(),
            stored_path: doc.source_path.display().to_string(),
            node_count: doc.node_map.len(),
            tree: doc.tree.clone(),
        }
    }
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/api/ingest",
            post(ingest_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/document", get(document_handler))
        .route("/api/ask", post(ask_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

fn status_code(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Service | ErrorKind::MalformedOutput => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: PipelineError) -> ApiError {
    let kind = err.kind();
    (
        status_code(kind),
        Json(json!({ "error": err.to_string(), "kind": kind })),
    )
}

// --- Handlers ---

/// Lee los campos `file` y `url` del formulario. Los demás se ignoran.
async fn read_source(mut multipart: Multipart) -> Result<DocumentSource, PipelineError> {
    let invalid = |e: axum::extract::multipart::MultipartError| {
        PipelineError::InvalidSource(format!("formulario no válido: {e}"))
    };

    let mut upload = None;
    let mut url = None;
    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(invalid)?;
                upload = Some((filename, bytes.to_vec()));
            }
            "url" => url = Some(field.text().await.map_err(invalid)?),
            _ => {}
        }
    }

    DocumentSource::from_parts(upload, url)
}

#[axum::debug_handler]
async fn ingest_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DocumentView>, ApiError> {
    let _busy = BusyGuard::acquire(&state.status, "Procesando documento...").map_err(api_error)?;
    let source = read_source(multipart).await.map_err(api_error)?;

    let context = IngestContext {
        data_dir: &state.config.data_dir,
        http: &state.http,
        indexer: state.indexer.as_ref(),
        poll_policy: state.config.poll_policy,
        status: state.status.clone(),
    };

    match ingest::ingest_document(source, context).await {
        Ok(document) => {
            let document = state
                .session
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(document);
            Status::report(
                &state.status,
                &format!("✅ Documento listo: {}", document.display_name),
                1.0,
            );
            Ok(Json(DocumentView::from(document.as_ref())))
        }
        Err(err) => {
            Status::report(&state.status, &err.to_string(), 0.0);
            Err(api_error(err))
        }
    }
}

#[axum::debug_handler]
async fn document_handler(State(state): State<AppState>) -> Result<Json<DocumentView>, ApiError> {
    let current = state
        .session
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .current();

    match current {
        Some(document) => Ok(Json(DocumentView::from(document.as_ref()))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": PipelineError::NoDocument.to_string(), "kind": ErrorKind::Conflict })),
        )),
    }
}

#[axum::debug_handler]
async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskPayload>,
) -> Result<Json<QuestionOutcome>, ApiError> {
    let _busy = BusyGuard::acquire(&state.status, "Preparando la consulta...").map_err(api_error)?;
    let document = state
        .session
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .current()
        .ok_or_else(|| api_error(PipelineError::NoDocument))?;

    let status = state.status.clone();
    let result = rag::answer_question(
        state.llm.as_ref(),
        &state.config.llm_chat_model,
        &document,
        &payload.question,
        |phase| {
            let (message, progress) = match phase {
                QuestionPhase::Idle => ("Preparando la consulta...", 0.0),
                QuestionPhase::Selecting => ("Buscando nodos relevantes en el árbol...", 0.2),
                QuestionPhase::Synthesizing => ("Generando la respuesta...", 0.6),
                QuestionPhase::Answered => ("Respuesta generada.", 1.0),
                QuestionPhase::Failed => ("La consulta ha fallado.", 0.0),
            };
            Status::report(&status, message, progress);
        },
    )
    .await;

    result.map(Json).map_err(|err| {
        error!("Error al procesar la consulta: {err}");
        api_error(err)
    })
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().unwrap_or_else(PoisonError::into_inner).clone())
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
    {
        let _ = sender.send(());
    }
    StatusCode::OK
}
