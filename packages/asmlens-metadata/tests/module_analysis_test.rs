//! End-to-end analysis of a synthesised module: every analyzer plus the
//! decompiler against one real byte layout.

use std::sync::Arc;

use asmlens_metadata::testing::{ModuleBuilder, TypeDecl};
use asmlens_metadata::{
    build_inheritance_graph, build_type_tree, collect_statistics, extract_dependencies,
    extract_metadata, public_key_token, CachingDecompiler, Decompiler, DecompilerCacheConfig,
    EdgeKind, EntityKind, ModuleReader, ModuleStatistics, NodeKey, TypeTreeNodeKind,
    GLOBAL_NAMESPACE,
};
use pretty_assertions::assert_eq;

struct Shapes {
    image: Vec<u8>,
    main: u32,
    circle: u32,
    point: u32,
    builder_ty: u32,
    area: u32,
}

fn shapes_module() -> Shapes {
    let mut b = ModuleBuilder::new("Shapes");
    let object = b.type_ref("System", "Object");
    let value_type = b.type_ref("System", "ValueType");

    let program = b.add_type(TypeDecl::class("", "Program").extends(object));
    let ishape = b.add_type(TypeDecl::interface("Acme.Geometry", "IShape"));
    let circle = b.add_type(TypeDecl::class("Acme.Geometry", "Circle").extends(object));
    b.implements(circle, ishape);
    let point = b.add_type(TypeDecl::value_type("Acme.Geometry", "Point", value_type));
    let builder_ty = b.add_type(TypeDecl::class("", "Builder").extends(object));
    b.nest(builder_ty, circle);
    let cache = b.add_type(TypeDecl::class("Acme.Geometry", "Cache").extends(object));
    b.mark_compiler_generated(cache);
    b.add_type(TypeDecl::class("Acme.Geometry", "<>c").extends(object));

    let main = b.add_static_method(program, "Main", &[]);
    b.executable(main);
    let iface_area = b.add_method(ishape, "Area", false);
    b.with_body(iface_area, None);
    b.add_method(circle, ".ctor", true);
    let area = b.add_method(circle, "Area", false);
    let get_radius = b.add_method(circle, "get_Radius", true);
    b.add_method(builder_ty, "Build", false);
    let radius = b.add_property(circle, "Radius");
    b.accessors(radius, Some(get_radius), None);

    Shapes {
        image: b.build(),
        main,
        circle,
        point,
        builder_ty,
        area,
    }
}

#[test]
fn test_statistics_skip_synthetic_types() {
    let shapes = shapes_module();
    let reader = ModuleReader::from_bytes(shapes.image).unwrap();

    assert_eq!(
        collect_statistics(&reader).unwrap(),
        ModuleStatistics {
            namespace_count: 1,
            type_count: 5,
            class_count: 3,
            interface_count: 1,
            struct_count: 1,
            method_count: 4,
            property_count: 1,
        }
    );
}

#[test]
fn test_type_tree_shape() {
    let shapes = shapes_module();
    let reader = ModuleReader::from_bytes(shapes.image).unwrap();
    let tree = build_type_tree(&reader).unwrap();

    assert_eq!(tree.name, "Shapes");
    let namespaces: Vec<_> = tree.children.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(namespaces, vec![GLOBAL_NAMESPACE, "Acme.Geometry"]);

    let main = tree.find(&[GLOBAL_NAMESPACE, "Program", "Main"]).unwrap();
    assert_eq!(main.handle, shapes.main);
    assert_eq!(main.kind, TypeTreeNodeKind::Method);

    let circle = tree.find(&["Acme.Geometry", "Circle"]).unwrap();
    assert_eq!(circle.handle, shapes.circle);
    let members: Vec<_> = circle.children.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(members, vec![".ctor", "Area", "Builder", "Radius"]);
    assert_eq!(
        tree.find(&["Acme.Geometry", "Circle", "Builder"]).unwrap().handle,
        shapes.builder_ty
    );
    assert_eq!(
        tree.find(&["Acme.Geometry", "Point"]).unwrap().kind,
        TypeTreeNodeKind::Struct
    );

    let geometry = tree.find(&["Acme.Geometry"]).unwrap();
    assert!(geometry.children.iter().all(|n| n.name != "Cache" && n.name != "<>c"));
}

#[test]
fn test_inheritance_graph_shape() {
    let shapes = shapes_module();
    let reader = ModuleReader::from_bytes(shapes.image).unwrap();
    let graph = build_inheritance_graph(&reader).unwrap();

    assert_eq!(graph.nodes.len(), 6);
    assert_eq!(graph.edges.len(), 2);
    assert!(graph.node(&NodeKey::External("System.Object".into())).is_none());

    let point = graph.node(&NodeKey::Internal(shapes.point)).unwrap();
    let value_type = graph
        .node(&NodeKey::External("System.ValueType".into()))
        .unwrap();
    assert!(graph
        .edges
        .iter()
        .any(|e| e.source == point.id && e.target == value_type.id && e.kind == EdgeKind::Extends));

    let circle = graph.node(&NodeKey::Internal(shapes.circle)).unwrap();
    assert!(graph
        .edges
        .iter()
        .any(|e| e.source == circle.id && e.kind == EdgeKind::Implements));
}

#[test]
fn test_artifacts_round_trip_through_json() {
    let shapes = shapes_module();
    let reader = ModuleReader::from_bytes(shapes.image).unwrap();

    let metadata = extract_metadata(&reader).unwrap();
    assert!(metadata.is_executable);
    assert_eq!(metadata.entry_point.as_deref(), Some("Program::Main"));
    let json = serde_json::to_value(&metadata).unwrap();
    assert_eq!(serde_json::from_value::<asmlens_metadata::AssemblyMetadata>(json).unwrap(), metadata);

    let stats = collect_statistics(&reader).unwrap();
    let json = serde_json::to_string(&stats).unwrap();
    assert_eq!(serde_json::from_str::<ModuleStatistics>(&json).unwrap(), stats);

    let tree = build_type_tree(&reader).unwrap();
    let json = serde_json::to_string(&tree).unwrap();
    assert_eq!(serde_json::from_str::<asmlens_metadata::TypeTreeNode>(&json).unwrap(), tree);

    let deps = extract_dependencies(&reader).unwrap();
    let json = serde_json::to_string(&deps).unwrap();
    assert_eq!(serde_json::from_str::<asmlens_metadata::DependencyReport>(&json).unwrap(), deps);

    let graph = build_inheritance_graph(&reader).unwrap();
    let json = serde_json::to_string(&graph).unwrap();
    assert_eq!(serde_json::from_str::<asmlens_metadata::InheritanceGraph>(&json).unwrap(), graph);
}

#[test]
fn test_decompiler_on_disk_module() {
    let shapes = shapes_module();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("module.exe");
    std::fs::write(&path, &shapes.image).unwrap();

    let decompiler: Arc<dyn Decompiler> =
        Arc::new(CachingDecompiler::new(DecompilerCacheConfig::default()));

    let nested = decompiler.decompile(&path, shapes.builder_ty).unwrap();
    assert_eq!(nested.kind, EntityKind::Type);
    assert_eq!(nested.name, "Acme.Geometry.Circle+Builder");

    let area = decompiler.decompile(&path, shapes.area).unwrap();
    assert_eq!(area.name, "Acme.Geometry.Circle::Area");
    assert!(area.source.contains("public void Area()"));
    assert!(area.disassembly.contains("IL_0000: ret"));

    decompiler.evict_module(&path);
    decompiler.dispose();
}

#[test]
fn test_public_key_token_is_byte_exact() {
    let ecma = [0u8, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];
    assert_eq!(public_key_token(&ecma, 0x0001).as_deref(), Some("b77a5c561934e089"));
    assert_eq!(public_key_token(&ecma, 0x0001), public_key_token(&ecma, 0x0001));
    assert_eq!(public_key_token(&[], 0x0001), None);
}
