//! Analysis results written through the artifact store read back unchanged.

use std::fmt::Debug;

use asmlens_metadata::testing::{ModuleBuilder, TypeDecl};
use asmlens_metadata::{
    build_inheritance_graph, build_type_tree, collect_statistics, extract_dependencies,
    extract_metadata, AssemblyMetadata, DependencyReport, InheritanceGraph, ModuleReader,
    ModuleStatistics, TypeTreeNode,
};
use asmlens_orchestration::ArtifactStore;
use asmlens_storage::StepName;
use pretty_assertions::assert_eq;
use serde::de::DeserializeOwned;
use serde::Serialize;

fn shapes_module() -> ModuleReader {
    let mut b = ModuleBuilder::new("Shapes");
    b.version(2, 1, 0, 7);
    b.assembly_attribute("System.Reflection", "AssemblyTitleAttribute", Some("Shapes"));
    let token = [0xB0, 0x3F, 0x5F, 0x7F, 0x11, 0xD5, 0x0A, 0x3A];
    let core = b.assembly_ref("System.Runtime", [8, 0, 0, 0], &token, "");
    let object = b.type_ref_in(core, "System", "Object");

    let drawable = b.add_type(TypeDecl::interface("Acme.Shapes", "IDrawable"));
    let shape = b.add_type(TypeDecl::class("Acme.Shapes", "Shape").extends(object));
    let circle = b.add_type(TypeDecl::class("Acme.Shapes", "Circle").extends(shape));
    let builder = b.add_type(TypeDecl::class("Acme.Shapes", "Builder").extends(object));
    b.nest(builder, circle);
    b.implements(shape, drawable);

    b.add_field(circle, "radius");
    let area = b.add_method(circle, "get_Area", true);
    let prop = b.add_property(circle, "Area");
    b.accessors(prop, Some(area), None);
    let scale = b.add_static_method(shape, "Scale", &["factor"]);
    b.with_body(scale, Some(vec![0x02, 0x2A]));

    ModuleReader::from_bytes(b.build()).unwrap()
}

async fn assert_roundtrip<T>(store: &ArtifactStore, step: StepName, value: T)
where
    T: Serialize + DeserializeOwned + PartialEq + Debug,
{
    let path = store
        .save("shapes", &value, step.artifact_file_name())
        .await
        .unwrap();
    assert!(path.ends_with(step.artifact_file_name()));

    let read: T = store
        .read("shapes", step.artifact_file_name())
        .await
        .unwrap();
    assert_eq!(read, value, "{} changed on the way through disk", step);
}

#[tokio::test]
async fn test_every_json_artifact_reads_back_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let reader = shapes_module();

    let metadata: AssemblyMetadata = extract_metadata(&reader).unwrap();
    let statistics: ModuleStatistics = collect_statistics(&reader).unwrap();
    let tree: TypeTreeNode = build_type_tree(&reader).unwrap();
    let dependencies: DependencyReport = extract_dependencies(&reader).unwrap();
    let graph: InheritanceGraph = build_inheritance_graph(&reader).unwrap();

    assert_eq!(statistics.type_count, 4);
    assert!(!graph.edges.is_empty());

    assert_roundtrip(&store, StepName::Metadata, metadata).await;
    assert_roundtrip(&store, StepName::Statistics, statistics).await;
    assert_roundtrip(&store, StepName::TypeTree, tree).await;
    assert_roundtrip(&store, StepName::Dependencies, dependencies).await;
    assert_roundtrip(&store, StepName::InheritanceGraph, graph).await;

    for step in StepName::REQUIRED {
        assert!(store.artifact_exists("shapes", step.artifact_file_name()).await);
    }
}
