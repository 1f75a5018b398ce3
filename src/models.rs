//! Modelos de dominio (árbol de PageIndex, mapa de nodos y resultados de consulta).

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;

/// Nodo del árbol devuelto por el servicio de indexación.
///
/// Acepta tanto `id`/`children` como los nombres de PageIndex (`node_id`/`nodes`)
/// y al serializar escribe los mismos nombres que se leyeron.
/// Los campos desconocidos (rango de páginas, etc.) se conservan en `extra`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawTreeNode")]
pub struct TreeNode {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub text: Option<String>,
    pub children: Vec<TreeNode>,
    pub extra: Map<String, Value>,
    pub keys: NodeKeys,
}

/// Nombres de los campos de id e hijos tal y como llegaron del servicio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeKeys {
    pub id: &'static str,
    pub children: &'static str,
}

#[derive(Deserialize)]
struct RawTreeNode {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    children: Option<Vec<TreeNode>>,
    #[serde(default)]
    nodes: Option<Vec<TreeNode>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<RawTreeNode> for TreeNode {
    type Error = String;

    fn try_from(raw: RawTreeNode) -> Result<Self, Self::Error> {
        let (id, id_key) = match (raw.node_id, raw.id) {
            (Some(id), None) => (id, "node_id"),
            (None, Some(id)) => (id, "id"),
            (Some(_), Some(_)) => return Err("el nodo tiene a la vez 'id' y 'node_id'".into()),
            (None, None) => return Err("falta el campo 'node_id' del nodo".into()),
        };
        let (children, children_key) = match (raw.nodes, raw.children) {
            (Some(nodes), None) => (nodes, "nodes"),
            (None, Some(children)) => (children, "children"),
            (Some(_), Some(_)) => return Err("el nodo tiene a la vez 'nodes' y 'children'".into()),
            (None, None) if id_key == "node_id" => (Vec::new(), "nodes"),
            (None, None) => (Vec::new(), "children"),
        };

        Ok(TreeNode {
            id,
            title: raw.title,
            summary: raw.summary,
            text: raw.text,
            children,
            extra: raw.extra,
            keys: NodeKeys {
                id: id_key,
                children: children_key,
            },
        })
    }
}

impl Serialize for TreeNode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(self.keys.id, &self.id)?;
        map.serialize_entry("title", &self.title)?;
        map.serialize_entry("summary", &self.summary)?;
        if let Some(text) = &self.text {
            map.serialize_entry("text", text)?;
        }
        if !self.children.is_empty() {
            map.serialize_entry(self.keys.children, &self.children)?;
        }
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Árbol completo de un documento: la lista ordenada de nodos raíz.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DocumentTree {
    pub nodes: Vec<TreeNode>,
}

impl DocumentTree {
    pub fn node_count(&self) -> usize {
        fn count(nodes: &[TreeNode]) -> usize {
            nodes.iter().map(|n| 1 + count(&n.children)).sum()
        }
        count(&self.nodes)
    }
}

impl<'de> Deserialize<'de> for DocumentTree {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            List(Vec<TreeNode>),
            Single(TreeNode),
            Wrapped { nodes: Vec<TreeNode> },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::List(nodes) | Repr::Wrapped { nodes } => DocumentTree { nodes },
            Repr::Single(root) => DocumentTree { nodes: vec![root] },
        })
    }
}

/// Contenido de un nodo, indexado por id en el `NodeMap`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub title: String,
    pub summary: String,
    pub text: Option<String>,
}

pub type NodeMap = HashMap<String, NodeRecord>;

/// Respuesta estructurada del LLM en la fase de selección de nodos.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionResult {
    pub thinking: String,
    pub node_list: Vec<String>,
}

/// Documento ya indexado y listo para consultas durante la sesión.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub doc_id: String,
    pub display_name: String,
    pub source_path: PathBuf,
    pub tree: DocumentTree,
    pub node_map: NodeMap,
}

/// Todo lo que se muestra al usuario tras responder una pregunta.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionOutcome {
    pub thinking: String,
    pub node_list: Vec<String>,
    pub unknown_node_ids: Vec<String>,
    pub context: String,
    pub answer: String,
}
