use std::sync::{Arc, Mutex, PoisonError, RwLock};
use reqwest::Client;
use tokio::sync::oneshot;
use crate::{
    config::AppConfig,
    error::{PipelineError, Result},
    llm::CompletionService,
    models::LoadedDocument,
    pageindex::IndexingService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub http: Client,
    pub indexer: Arc<dyn IndexingService>,
    pub llm: Arc<dyn CompletionService>,
    pub status: Arc<Mutex<Status>>,
    pub session: Arc<RwLock<Session>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
}

impl Status {
    pub fn report(status: &Mutex<Status>, message: &str, progress: f32) {
        let mut status = status.lock().unwrap_or_else(PoisonError::into_inner);
        status.message = message.to_string();
        status.progress = progress.clamp(0.0, 1.0);
    }
}

/// Documento activo de la sesión. Se sustituye entero en cada ingesta correcta.
#[derive(Debug, Default)]
pub struct Session {
    document: Option<Arc<LoadedDocument>>,
}

impl Session {
    pub fn current(&self) -> Option<Arc<LoadedDocument>> {
        self.document.clone()
    }

    pub fn replace(&mut self, document: LoadedDocument) -> Arc<LoadedDocument> {
        let document = Arc::new(document);
        self.document = Some(document.clone());
        document
    }
}

/// Marca la aplicación como ocupada mientras dura una acción; se libera al soltarla.
pub struct BusyGuard {
    status: Arc<Mutex<Status>>,
}

impl BusyGuard {
    pub fn acquire(status: &Arc<Mutex<Status>>, message: &str) -> Result<Self> {
        let mut current = status.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_busy {
            return Err(PipelineError::Busy);
        }
        current.is_busy = true;
        current.message = message.to_string();
        current.progress = 0.0;
        Ok(Self {
            status: status.clone(),
        })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.is_busy = false;
        status.progress = 0.0;
    }
}
