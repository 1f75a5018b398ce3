//! Dobles de prueba en memoria para los dos servicios externos.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::error::{PipelineError, Result};
use crate::llm::{CompletionRequest, CompletionService};
use crate::models::DocumentTree;
use crate::pageindex::IndexingService;

/// Índice falso que se declara listo en la comprobación `ready_on` (o nunca).
pub struct FakeIndexer {
    ready_on: Option<u32>,
    tree: DocumentTree,
    checks: AtomicU32,
    fetches: AtomicU32,
    submitted: Mutex<Vec<PathBuf>>,
}

impl FakeIndexer {
    pub fn ready_after(attempt: u32) -> Self {
        Self {
            ready_on: Some(attempt),
            tree: sample_tree(),
            checks: AtomicU32::new(0),
            fetches: AtomicU32::new(0),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn never_ready() -> Self {
        Self {
            ready_on: None,
            ..Self::ready_after(1)
        }
    }

    pub fn ready_checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn tree_fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<PathBuf> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl IndexingService for FakeIndexer {
    async fn submit(&self, path: &Path) -> Result<String> {
        self.submitted.lock().unwrap().push(path.to_path_buf());
        Ok("pi-fake".to_string())
    }

    async fn is_ready(&self, _doc_id: &str) -> Result<bool> {
        let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.ready_on.is_some_and(|k| n >= k))
    }

    async fn get_tree(&self, _doc_id: &str, _include_summaries: bool) -> Result<DocumentTree> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.tree.clone())
    }
}

/// LLM falso que devuelve respuestas predefinidas en orden y guarda las peticiones.
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PipelineError::Completion("sin respuestas preparadas".into()))
    }
}

/// Árbol de dos nodos usado en los escenarios de extremo a extremo.
pub fn sample_tree() -> DocumentTree {
    serde_json::from_value(json!([
        {"id": "0000", "title": "Intro", "summary": "Background info", "text": "..."},
        {"id": "0001", "title": "Conclusion", "summary": "Final remarks", "text": "..."}
    ]))
    .unwrap()
}
