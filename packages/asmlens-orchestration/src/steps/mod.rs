// Step implementations
pub mod analyzer_step;
pub mod export_step;

use std::sync::Arc;

use asmlens_metadata::{
    build_inheritance_graph, build_type_tree, collect_statistics, extract_dependencies,
    extract_metadata,
};
use asmlens_storage::StepName;

use crate::artifact::ArtifactStore;
use crate::pipeline::ExecutorRegistry;

// Re-exports
pub use analyzer_step::AnalyzerStep;
pub use export_step::{ExportStep, EXPORTED_ARTIFACTS};

/// Registry with one executor per [`StepName`].
pub fn default_registry(artifacts: &ArtifactStore) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry
        .register(Arc::new(AnalyzerStep::new(
            StepName::Metadata,
            extract_metadata,
            artifacts.clone(),
        )))
        .register(Arc::new(AnalyzerStep::new(
            StepName::Statistics,
            collect_statistics,
            artifacts.clone(),
        )))
        .register(Arc::new(AnalyzerStep::new(
            StepName::TypeTree,
            build_type_tree,
            artifacts.clone(),
        )))
        .register(Arc::new(AnalyzerStep::new(
            StepName::Dependencies,
            extract_dependencies,
            artifacts.clone(),
        )))
        .register(Arc::new(AnalyzerStep::new(
            StepName::InheritanceGraph,
            build_inheritance_graph,
            artifacts.clone(),
        )))
        .register(Arc::new(ExportStep::new(artifacts.clone())));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_is_complete() {
        let dir = tempfile::tempdir().unwrap();
        let registry = default_registry(&ArtifactStore::new(dir.path()));
        assert!(registry.validate_complete().is_ok());
        for step in StepName::ALL {
            assert_eq!(registry.get(step).unwrap().step(), step);
        }
    }
}
