//! Ingesta de un PDF (subido o descargado de una URL): se guarda en el
//! directorio de datos, se envía a PageIndex y se espera a que el árbol esté listo.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use reqwest::Client;
use tracing::{error, info};
use url::Url;

use crate::{
    app_state::Status,
    error::{PipelineError, Result},
    models::LoadedDocument,
    pageindex::{self, IndexingService, PollPolicy},
    tree,
};

/// Origen del documento elegido por el usuario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    Upload { filename: String, bytes: Vec<u8> },
    Url(String),
}

impl DocumentSource {
    /// Valida la entrada antes de cualquier E/S. Si llegan ambas, prevalece la subida.
    pub fn from_parts(upload: Option<(String, Vec<u8>)>, url: Option<String>) -> Result<Self> {
        if let Some((filename, bytes)) = upload.filter(|(name, _)| !name.trim().is_empty()) {
            return Ok(Self::Upload { filename, bytes });
        }
        match url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) {
            Some(url) => Ok(Self::Url(url)),
            None => Err(PipelineError::MissingInput),
        }
    }
}

/// Fichero ya guardado en disco.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub path: PathBuf,
    pub display_name: String,
}

/// Todo lo que necesita la ingesta, salvo el propio documento.
pub struct IngestContext<'a> {
    pub data_dir: &'a Path,
    pub http: &'a Client,
    pub indexer: &'a dyn IndexingService,
    pub poll_policy: PollPolicy,
    pub status: Arc<Mutex<Status>>,
}

/// Nombre de fichero de una subida, sin componentes de directorio.
fn upload_file_name(filename: &str) -> Result<String> {
    Path::new(filename)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PipelineError::InvalidSource(format!("nombre de fichero no válido: {filename}")))
}

/// Último segmento no vacío de la ruta de la URL.
fn url_file_name(url: &Url) -> Result<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            PipelineError::InvalidSource(format!("la URL no termina en un nombre de fichero: {url}"))
        })
}

/// Guarda el documento en `<data_dir>/<nombre>`, sobrescribiendo si ya existe.
pub async fn store_document(
    source: DocumentSource,
    data_dir: &Path,
    http: &Client,
) -> Result<StoredDocument> {
    let (display_name, bytes) = match source {
        DocumentSource::Upload { filename, bytes } => (upload_file_name(&filename)?, bytes),
        DocumentSource::Url(raw) => {
            let url = Url::parse(&raw)
                .map_err(|e| PipelineError::InvalidSource(format!("URL no válida '{raw}': {e}")))?;
            let name = url_file_name(&url)?;

            info!("Descargando {url}...");
            let response = http
                .get(url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(PipelineError::Download)?;
            let bytes = response.bytes().await.map_err(PipelineError::Download)?;
            (name, bytes.to_vec())
        }
    };

    tokio::fs::create_dir_all(data_dir).await?;
    let path = data_dir.join(&display_name);
    tokio::fs::write(&path, &bytes).await?;
    info!("Guardado {} ({} bytes).", path.display(), bytes.len());

    Ok(StoredDocument { path, display_name })
}

/// Acción completa de la columna izquierda: guardar, enviar, esperar y descargar el árbol.
pub async fn ingest_document(source: DocumentSource, ctx: IngestContext<'_>) -> Result<LoadedDocument> {
    let result = run_ingestion(source, &ctx).await;
    if let Err(err) = &result {
        error!("Error de ingesta: {err}");
    }
    result
}

async fn run_ingestion(source: DocumentSource, ctx: &IngestContext<'_>) -> Result<LoadedDocument> {
    Status::report(&ctx.status, "Guardando el PDF...", 0.0);
    let stored = store_document(source, ctx.data_dir, ctx.http).await?;

    Status::report(&ctx.status, "Enviando el documento a PageIndex...", 0.05);
    let doc_id = ctx.indexer.submit(&stored.path).await?;
    info!("Documento enviado. Doc ID: {doc_id}");

    let max = ctx.poll_policy.max_attempts;
    pageindex::wait_until_ready(ctx.indexer, &doc_id, ctx.poll_policy, |attempt| {
        Status::report(
            &ctx.status,
            &format!("Esperando a que PageIndex procese el documento ({attempt}/{max})..."),
            0.1 + 0.8 * (attempt as f32 / max as f32),
        );
    })
    .await?;

    Status::report(&ctx.status, "Descargando el árbol del documento...", 0.95);
    let tree = ctx.indexer.get_tree(&doc_id, true).await?;
    let node_map = tree::flatten(&tree);
    info!(
        "Árbol de '{}' cargado: {} nodos.",
        stored.display_name,
        node_map.len()
    );

    Ok(LoadedDocument {
        doc_id,
        display_name: stored.display_name,
        source_path: stored.path,
        tree,
        node_map,
    })
}
