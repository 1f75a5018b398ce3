//! Consulta RAG sin vectores sobre el árbol de PageIndex.
//!
//! Flujo por pregunta:
//!   1. Se proyecta el árbol sin `text` y se pide al LLM que elija los nodos
//!      relevantes, razonando sobre títulos y resúmenes.
//!   2. Se construye el contexto con los resúmenes de los nodos elegidos.
//!   3. El LLM responde usando sólo ese contexto.

use serde_json::Value;
use tracing::{info, warn};

use crate::{
    error::{PipelineError, Result},
    llm::{ChatMessage, CompletionRequest, CompletionService},
    models::{DocumentTree, LoadedDocument, NodeMap, QuestionOutcome, SelectionResult},
    tree,
};

/// Temperatura de las dos llamadas: sin aleatoriedad.
const DETERMINISTIC: f64 = 0.0;

/// Fase de una pregunta. `Answered` y `Failed` son terminales.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionPhase {
    Idle,
    Selecting,
    Synthesizing,
    Answered,
    Failed,
}

pub fn build_selection_prompt(question: &str, projected_tree: &DocumentTree) -> Result<String> {
    let tree_json = serde_json::to_string_pretty(projected_tree)
        .map_err(|e| PipelineError::Completion(format!("no se pudo serializar el árbol: {e}")))?;

    Ok(format!(
        r#"
You are given a question and a tree structure of a document.
Each node contains a node id, node title, and a summary.
Your task is to find all nodes likely to contain the answer.

Question: {question}

Document tree structure:
{tree_json}

Reply in JSON:
{{
    "thinking": "<Your reasoning>",
    "node_list": ["node_id_1", ...]
}}
"#
    ))
}

pub fn build_answer_prompt(question: &str, context: &str) -> String {
    format!(
        r#"
Answer the question based on the context:

Question: {question}
Context: {context}

Provide a clear, concise answer based only on the context provided.
"#
    )
}

/// Interpreta la respuesta de selección: un objeto JSON con `thinking` (texto)
/// y `node_list` (lista de ids). Se toleran las vallas ```json de markdown.
pub fn parse_selection(reply: &str) -> Result<SelectionResult> {
    let body = strip_code_fence(reply);

    let value: Value = serde_json::from_str(body)
        .map_err(|e| PipelineError::MalformedSelection(format!("no es JSON ({e})")))?;

    let thinking = value
        .get("thinking")
        .and_then(Value::as_str)
        .ok_or_else(|| PipelineError::MalformedSelection("falta el campo 'thinking'".into()))?;

    let node_list = value
        .get("node_list")
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::MalformedSelection("falta el campo 'node_list'".into()))?
        .iter()
        .map(|id| {
            id.as_str().map(str::to_string).ok_or_else(|| {
                PipelineError::MalformedSelection(format!("id de nodo no textual: {id}"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SelectionResult {
        thinking: thinking.to_string(),
        node_list,
    })
}

/// Quita una valla de código markdown (```json, ```JSON o ```) alrededor de la respuesta.
fn strip_code_fence(reply: &str) -> &str {
    let body = reply.trim();
    let Some(rest) = body.strip_prefix("```") else {
        return body;
    };
    let rest = match rest.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &rest[4..],
        _ => rest,
    };
    let rest = rest.trim_end();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Pide al LLM los nodos relevantes para la pregunta.
pub async fn select_nodes(
    llm: &dyn CompletionService,
    model: &str,
    question: &str,
    tree: &DocumentTree,
) -> Result<SelectionResult> {
    let projected = tree::strip_text(tree);
    let prompt = build_selection_prompt(question, &projected)?;

    let reply = llm
        .complete(CompletionRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::user(prompt)],
            temperature: DETERMINISTIC,
        })
        .await?;

    parse_selection(&reply)
}

/// Une, en el orden dado, los resúmenes de los ids presentes en el mapa.
pub fn assemble_context(node_list: &[String], node_map: &NodeMap) -> String {
    node_list
        .iter()
        .filter_map(|id| node_map.get(id))
        .map(|record| record.summary.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Ids devueltos por el LLM que no existen en el árbol (sin repetir).
pub fn unknown_node_ids(node_list: &[String], node_map: &NodeMap) -> Vec<String> {
    let mut unknown: Vec<String> = Vec::new();
    for id in node_list {
        if !node_map.contains_key(id) && !unknown.contains(id) {
            unknown.push(id.clone());
        }
    }
    unknown
}

pub async fn synthesize_answer(
    llm: &dyn CompletionService,
    model: &str,
    question: &str,
    context: &str,
) -> Result<String> {
    let reply = llm
        .complete(CompletionRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::user(build_answer_prompt(question, context))],
            temperature: DETERMINISTIC,
        })
        .await?;
    Ok(reply.trim().to_string())
}

/// Responde una pregunta sobre el documento cargado, notificando cada cambio de fase.
pub async fn answer_question<F>(
    llm: &dyn CompletionService,
    model: &str,
    document: &LoadedDocument,
    question: &str,
    mut on_phase: F,
) -> Result<QuestionOutcome>
where
    F: FnMut(QuestionPhase) + Send,
{
    let question = question.trim();
    if question.is_empty() {
        return Err(PipelineError::EmptyQuestion);
    }
    on_phase(QuestionPhase::Idle);

    on_phase(QuestionPhase::Selecting);
    let selection = match select_nodes(llm, model, question, &document.tree).await {
        Ok(selection) => selection,
        Err(e) => {
            on_phase(QuestionPhase::Failed);
            return Err(e);
        }
    };
    info!(
        "Nodos seleccionados para '{}': {:?}",
        question, selection.node_list
    );

    let unknown = unknown_node_ids(&selection.node_list, &document.node_map);
    if !unknown.is_empty() {
        warn!("El LLM devolvió ids que no existen en el árbol: {:?}", unknown);
    }
    let context = assemble_context(&selection.node_list, &document.node_map);

    on_phase(QuestionPhase::Synthesizing);
    let answer = match synthesize_answer(llm, model, question, &context).await {
        Ok(answer) => answer,
        Err(e) => {
            on_phase(QuestionPhase::Failed);
            return Err(e);
        }
    };
    on_phase(QuestionPhase::Answered);

    Ok(QuestionOutcome {
        thinking: selection.thinking,
        node_list: selection.node_list,
        unknown_node_ids: unknown,
        context,
        answer,
    })
}
