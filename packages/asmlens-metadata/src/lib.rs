/*
 * asmlens metadata - managed module inspection
 *
 * Reads ECMA-335 metadata straight from PE images and derives the
 * structural artifacts of an analysis run.
 *
 * Architecture:
 * - Reader: PE/CLI headers, metadata heaps, tables, signatures
 * - Analysis: metadata summary, statistics, type tree, dependencies, inheritance graph
 * - Decompiler: declaration rendering + CIL disassembly behind a TTL cache
 */

pub mod analysis;
pub mod decompiler;
pub mod error;
pub mod model;
pub mod reader;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-exports
pub use analysis::{
    build_inheritance_graph, build_type_tree, collect_statistics, extract_dependencies,
    extract_metadata, AssemblyMetadata, DependencyReport, EdgeKind, GraphEdge, GraphNode,
    InheritanceGraph, ModuleStatistics, NodeKey, TypeTreeNode, TypeTreeNodeKind,
    GLOBAL_NAMESPACE,
};
pub use decompiler::{
    CachingDecompiler, DecompiledEntity, Decompiler, DecompilerCacheConfig, EntityKind,
    ModuleCache,
};
pub use error::{MetadataError, Result};
pub use model::{
    AssemblyIdentity, FieldDefinition, MethodDefinition, PropertyDefinition, TypeDefinition,
    TypeKind, TypeReference, TypeVisibility,
};
pub use reader::{public_key_token, ModuleReader};
