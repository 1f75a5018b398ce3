//! Cliente del servicio de indexación (PageIndex) y espera acotada hasta que el
//! documento está listo para consultas.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::models::DocumentTree;

/// Operaciones que consumimos del servicio de indexación.
#[async_trait]
pub trait IndexingService: Send + Sync {
    /// Sube el fichero y devuelve el id asignado por el servicio.
    async fn submit(&self, path: &Path) -> Result<String>;
    /// Comprobación puntual (no bloqueante) de si el documento está listo.
    async fn is_ready(&self, doc_id: &str) -> Result<bool>;
    /// Descarga el árbol completo en una única petición.
    async fn get_tree(&self, doc_id: &str, include_summaries: bool) -> Result<DocumentTree>;
}

/// Política de espera: `max_attempts` comprobaciones separadas por `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 20)
    }
}

/// Comprueba la disponibilidad hasta `max_attempts` veces.
///
/// Devuelve el número de la comprobación en la que el documento estuvo listo.
/// Si nunca lo está, devuelve `StillProcessing`; un error en una comprobación
/// aborta la espera inmediatamente.
pub async fn wait_until_ready<F>(
    service: &dyn IndexingService,
    doc_id: &str,
    policy: PollPolicy,
    mut on_attempt: F,
) -> Result<u32>
where
    F: FnMut(u32) + Send,
{
    for attempt in 1..=policy.max_attempts {
        on_attempt(attempt);
        if service.is_ready(doc_id).await? {
            info!("Documento {doc_id} listo tras {attempt} comprobación(es).");
            return Ok(attempt);
        }
        debug!("Documento {doc_id} aún no está listo ({attempt}/{}).", policy.max_attempts);
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(PipelineError::StillProcessing {
        attempts: policy.max_attempts,
    })
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    doc_id: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    retrieval_ready: bool,
    #[serde(default)]
    result: Option<Value>,
}

/// Cliente HTTP de la API de PageIndex.
#[derive(Debug, Clone)]
pub struct PageIndexClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl PageIndexClient {
    pub fn new(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn fetch_tree(&self, doc_id: &str, include_summaries: bool) -> Result<TreeResponse> {
        let url = format!("{}/doc/{}/", self.base_url, doc_id);
        let response = self
            .http
            .get(&url)
            .header("api_key", &self.api_key)
            .query(&[
                ("type", "tree"),
                ("summary", if include_summaries { "true" } else { "false" }),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::Indexing(e.to_string()))?;

        response
            .json::<TreeResponse>()
            .await
            .map_err(|e| PipelineError::Indexing(format!("respuesta de árbol no válida: {e}")))
    }
}

#[async_trait]
impl IndexingService for PageIndexClient {
    async fn submit(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document.pdf".to_string());
        let mime = mime_guess::from_path(path).first_or_octet_stream();

        let part = multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime.as_ref())
            .map_err(|e| PipelineError::Indexing(e.to_string()))?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("if_retrieval", "true");

        let response = self
            .http
            .post(format!("{}/doc/", self.base_url))
            .header("api_key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::Indexing(e.to_string()))?;

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Indexing(format!("respuesta de envío no válida: {e}")))?;
        Ok(body.doc_id)
    }

    async fn is_ready(&self, doc_id: &str) -> Result<bool> {
        Ok(self.fetch_tree(doc_id, false).await?.retrieval_ready)
    }

    async fn get_tree(&self, doc_id: &str, include_summaries: bool) -> Result<DocumentTree> {
        let result = self
            .fetch_tree(doc_id, include_summaries)
            .await?
            .result
            .ok_or_else(|| PipelineError::Indexing("la respuesta no contiene 'result'".into()))?;

        serde_json::from_value(result)
            .map_err(|e| PipelineError::Indexing(format!("árbol con formato inesperado: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeIndexer;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn instant(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(Duration::ZERO, max_attempts)
    }

    #[tokio::test]
    async fn stops_polling_on_first_ready_check() {
        for k in 1..=20 {
            let indexer = FakeIndexer::ready_after(k);
            let mut seen = Vec::new();
            let attempt = wait_until_ready(&indexer, "doc", instant(20), |a| seen.push(a))
                .await
                .unwrap();

            assert_eq!(attempt, k);
            assert_eq!(indexer.ready_checks(), k);
            assert_eq!(seen, (1..=k).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn times_out_after_max_attempts_without_fetching_tree() {
        let indexer = FakeIndexer::never_ready();
        let err = wait_until_ready(&indexer, "doc", instant(20), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::StillProcessing { attempts: 20 }));
        assert_eq!(indexer.ready_checks(), 20);
        assert_eq!(indexer.tree_fetches(), 0);
    }

    #[tokio::test]
    async fn waits_the_interval_between_checks() {
        let indexer = FakeIndexer::ready_after(3);
        let policy = PollPolicy::new(Duration::from_millis(20), 5);
        let started = std::time::Instant::now();
        assert_ok!(wait_until_ready(&indexer, "doc", policy, |_| {}).await);
        // Dos esperas entre tres comprobaciones.
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn client_submits_multipart_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/doc/"))
            .and(header("api_key", "pi-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"doc_id": "pi-123"})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("report.pdf");
        std::fs::write(&pdf, b"%PDF-1.4 fake").unwrap();

        let client = PageIndexClient::new(Client::new(), server.uri(), "pi-test");
        assert_eq!(client.submit(&pdf).await.unwrap(), "pi-123");

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("filename=\"report.pdf\""));
        assert!(body.contains("application/pdf"));
        assert!(body.contains("%PDF-1.4 fake"));
    }

    #[tokio::test]
    async fn client_reads_readiness_and_tree() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc/pi-123/"))
            .and(query_param("type", "tree"))
            .and(query_param("summary", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "completed",
                "retrieval_ready": true,
                "result": [
                    {"node_id": "0000", "title": "Intro", "summary": "Background info", "text": "..."},
                    {"node_id": "0001", "title": "Conclusion", "summary": "Final remarks", "text": "..."}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/doc/pi-123/"))
            .and(query_param("summary", "false"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})),
            )
            .mount(&server)
            .await;

        let client = PageIndexClient::new(Client::new(), server.uri(), "pi-test");
        assert!(!client.is_ready("pi-123").await.unwrap());

        let tree = client.get_tree("pi-123", true).await.unwrap();
        assert_eq!(tree.node_count(), 2);
        assert_eq!(tree.nodes[1].summary, "Final remarks");
    }

    #[tokio::test]
    async fn client_surfaces_service_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/doc/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/doc/missing/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"retrieval_ready": true})))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("a.pdf");
        std::fs::write(&pdf, b"x").unwrap();

        let client = PageIndexClient::new(Client::new(), server.uri(), "bad-key");
        let err = assert_err!(client.submit(&pdf).await);
        assert!(matches!(err, PipelineError::Indexing(_)));

        let err = assert_err!(client.get_tree("missing", true).await);
        assert!(err.to_string().contains("result"));
    }
}
