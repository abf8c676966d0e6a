//! Inheritance graph over base types and implemented interfaces.
//!
//! Edges point from the derived type to its base (`extends`) or interface
//! (`implements`). `System.Object` is left out: almost every class would
//! otherwise fan into it.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use super::visible_types;
use crate::error::Result;
use crate::model::{TypeKind, TypeReference};
use crate::reader::ModuleReader;

/// Node identity: a TypeDef token for types in this module, the full name otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "origin", content = "id", rename_all = "snake_case")]
pub enum NodeKey {
    Internal(u32),
    External(String),
}

impl NodeKey {
    fn of(reference: &TypeReference) -> Self {
        match reference {
            TypeReference::Internal { handle, .. } => NodeKey::Internal(*handle),
            TypeReference::External { full_name, .. } => NodeKey::External(full_name.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Extends,
    Implements,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: usize,
    pub key: NodeKey,
    pub name: String,
    /// Known only for types defined in this module
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TypeKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: usize,
    pub target: usize,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InheritanceGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl InheritanceGraph {
    pub fn node(&self, key: &NodeKey) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| &n.key == key)
    }
}

struct NodeData {
    key: NodeKey,
    name: String,
    kind: Option<TypeKind>,
}

/// Builder state: graph plus key → node index for deduplication
struct GraphBuilder {
    graph: DiGraph<NodeData, EdgeKind>,
    key_to_node: HashMap<NodeKey, NodeIndex>,
}

impl GraphBuilder {
    fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            key_to_node: HashMap::new(),
        }
    }

    fn node(&mut self, key: NodeKey, name: &str, kind: Option<TypeKind>) -> NodeIndex {
        if let Some(idx) = self.key_to_node.get(&key) {
            let data = &mut self.graph[*idx];
            if data.kind.is_none() {
                data.kind = kind;
            }
            return *idx;
        }
        let idx = self.graph.add_node(NodeData {
            key: key.clone(),
            name: name.to_string(),
            kind,
        });
        self.key_to_node.insert(key, idx);
        idx
    }

    fn finish(self) -> InheritanceGraph {
        let nodes = self
            .graph
            .node_indices()
            .map(|idx| {
                let data = &self.graph[idx];
                GraphNode {
                    id: idx.index(),
                    key: data.key.clone(),
                    name: data.name.clone(),
                    kind: data.kind,
                }
            })
            .collect();
        let edges = self
            .graph
            .raw_edges()
            .iter()
            .map(|edge| GraphEdge {
                source: edge.source().index(),
                target: edge.target().index(),
                kind: edge.weight,
            })
            .collect();
        InheritanceGraph { nodes, edges }
    }
}

pub fn build_inheritance_graph(reader: &ModuleReader) -> Result<InheritanceGraph> {
    let types = visible_types(reader)?;
    let mut builder = GraphBuilder::new();

    // every visible type gets a node, even without relations
    for ty in &types {
        builder.node(NodeKey::Internal(ty.handle), &ty.full_name, Some(ty.kind));
    }

    for ty in &types {
        let source = builder.node(NodeKey::Internal(ty.handle), &ty.full_name, Some(ty.kind));
        let relations = ty
            .base_type
            .iter()
            .map(|base| (base, EdgeKind::Extends))
            .chain(ty.interfaces.iter().map(|iface| (iface, EdgeKind::Implements)));

        for (reference, kind) in relations {
            if reference.is_system_object() {
                continue;
            }
            let target = builder.node(NodeKey::of(reference), reference.full_name(), None);
            if builder.graph.find_edge(source, target).is_none() {
                builder.graph.add_edge(source, target, kind);
            }
        }
    }

    tracing::debug!(
        nodes = builder.graph.node_count(),
        edges = builder.graph.edge_count(),
        "built inheritance graph"
    );
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ModuleBuilder, TypeDecl};
    use std::collections::HashSet;

    #[test]
    fn test_object_root_is_excluded_and_externals_deduplicated() {
        let mut builder = ModuleBuilder::new("Graph");
        let object = builder.type_ref("System", "Object");
        let exception = builder.type_ref("System", "Exception");
        let disposable = builder.type_ref("System", "IDisposable");

        let base = builder.add_type(TypeDecl::class("Acme", "Base").extends(object));
        let first = builder.add_type(TypeDecl::class("Acme", "First").extends(base));
        let second = builder.add_type(TypeDecl::class("Acme", "Second").extends(base));
        let err_a = builder.add_type(TypeDecl::class("Acme", "ErrA").extends(exception));
        let err_b = builder.add_type(TypeDecl::class("Acme", "ErrB").extends(exception));
        builder.implements(first, disposable);
        builder.implements(second, disposable);

        let reader = ModuleReader::from_bytes(builder.build()).unwrap();
        let graph = build_inheritance_graph(&reader).unwrap();

        assert!(graph.nodes.iter().all(|n| n.name != "System.Object"));
        let keys: HashSet<_> = graph.nodes.iter().map(|n| n.key.clone()).collect();
        assert_eq!(keys.len(), graph.nodes.len());
        // 5 internal types + Exception + IDisposable
        assert_eq!(graph.nodes.len(), 7);

        let exception_node = graph
            .node(&NodeKey::External("System.Exception".into()))
            .unwrap();
        let into_exception = graph
            .edges
            .iter()
            .filter(|e| e.target == exception_node.id)
            .count();
        assert_eq!(into_exception, 2);

        let base_node = graph.node(&NodeKey::Internal(base)).unwrap();
        assert_eq!(base_node.kind, Some(TypeKind::Class));
        let first_node = graph.node(&NodeKey::Internal(first)).unwrap();
        assert!(graph.edges.contains(&GraphEdge {
            source: first_node.id,
            target: base_node.id,
            kind: EdgeKind::Extends,
        }));

        let implements = graph
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Implements)
            .count();
        assert_eq!(implements, 2);
        assert!(graph.node(&NodeKey::Internal(err_a)).is_some());
        assert!(graph.node(&NodeKey::Internal(err_b)).is_some());
    }

    #[test]
    fn test_generic_instantiation_maps_to_definition() {
        let mut builder = ModuleBuilder::new("Generic");
        let list = builder.type_ref("System.Collections.Generic", "List`1");
        let list_of_int = builder.generic_instance(list, 1);
        let list_again = builder.generic_instance(list, 1);
        builder.add_type(TypeDecl::class("Acme", "Numbers").extends(list_of_int));
        builder.add_type(TypeDecl::class("Acme", "MoreNumbers").extends(list_again));

        let reader = ModuleReader::from_bytes(builder.build()).unwrap();
        let graph = build_inheritance_graph(&reader).unwrap();

        let list_nodes: Vec<_> = graph
            .nodes
            .iter()
            .filter(|n| n.key == NodeKey::External("System.Collections.Generic.List`1".into()))
            .collect();
        assert_eq!(list_nodes.len(), 1);
        assert_eq!(graph.edges.len(), 2);
    }

    #[test]
    fn test_round_trips_through_json() {
        let mut builder = ModuleBuilder::new("Json");
        let object = builder.type_ref("System", "Object");
        builder.add_type(TypeDecl::class("Acme", "Only").extends(object));
        let reader = ModuleReader::from_bytes(builder.build()).unwrap();
        let graph = build_inheritance_graph(&reader).unwrap();

        let json = serde_json::to_string(&graph).unwrap();
        let back: InheritanceGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, graph);
    }
}
