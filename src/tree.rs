//! Proyecciones del árbol: versión sin texto para el prompt y mapa plano id → nodo.

use crate::models::{DocumentTree, NodeMap, NodeRecord, TreeNode};

/// Copia del árbol sin el campo `text` en ningún nodo.
pub fn strip_text(tree: &DocumentTree) -> DocumentTree {
    fn strip(node: &TreeNode) -> TreeNode {
        TreeNode {
            id: node.id.clone(),
            title: node.title.clone(),
            summary: node.summary.clone(),
            text: None,
            children: node.children.iter().map(strip).collect(),
            extra: node.extra.clone(),
            keys: node.keys,
        }
    }

    DocumentTree {
        nodes: tree.nodes.iter().map(strip).collect(),
    }
}

/// Recorre el árbol completo (en preorden) y devuelve todos los nodos por id.
/// Ante ids repetidos se queda con la primera aparición.
pub fn flatten(tree: &DocumentTree) -> NodeMap {
    let mut map = NodeMap::with_capacity(tree.node_count());
    let mut stack: Vec<&TreeNode> = tree.nodes.iter().rev().collect();

    while let Some(node) = stack.pop() {
        map.entry(node.id.clone()).or_insert_with(|| NodeRecord {
            title: node.title.clone(),
            summary: node.summary.clone(),
            text: node.text.clone(),
        });
        stack.extend(node.children.iter().rev());
    }

    map
}
