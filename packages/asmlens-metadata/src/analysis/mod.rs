//! Structural analyzers.
//!
//! Each analyzer is a pure function from an opened [`ModuleReader`] to a
//! serializable DTO; the orchestration layer persists the result as one
//! artifact per step.

mod dependencies;
mod inheritance;
mod metadata;
mod statistics;
mod type_tree;

pub use dependencies::{extract_dependencies, DependencyReport};
pub use inheritance::{
    build_inheritance_graph, EdgeKind, GraphEdge, GraphNode, InheritanceGraph, NodeKey,
};
pub use metadata::{extract_metadata, AssemblyMetadata};
pub use statistics::{collect_statistics, ModuleStatistics};
pub use type_tree::{build_type_tree, TypeTreeNode, TypeTreeNodeKind, GLOBAL_NAMESPACE};

use crate::error::Result;
use crate::model::TypeDefinition;
use crate::reader::ModuleReader;

/// Types that are not compiler-generated implementation details.
pub(crate) fn visible_types(reader: &ModuleReader) -> Result<Vec<TypeDefinition>> {
    Ok(reader
        .type_definitions()?
        .into_iter()
        .filter(|ty| !ty.is_synthetic)
        .collect())
}
