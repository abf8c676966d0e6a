use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::visible_types;
use crate::error::Result;
use crate::model::{has_synthetic_name, TypeDefinition, TypeKind};
use crate::reader::ModuleReader;

/// Namespace node name for types declared outside any namespace.
pub const GLOBAL_NAMESPACE: &str = "<global namespace>";

const MAX_NESTING: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTreeNodeKind {
    Assembly,
    Namespace,
    Class,
    Interface,
    Struct,
    Enum,
    Delegate,
    Method,
    Property,
}

impl From<TypeKind> for TypeTreeNodeKind {
    fn from(kind: TypeKind) -> Self {
        match kind {
            TypeKind::Class => TypeTreeNodeKind::Class,
            TypeKind::Interface => TypeTreeNodeKind::Interface,
            TypeKind::Struct => TypeTreeNodeKind::Struct,
            TypeKind::Enum => TypeTreeNodeKind::Enum,
            TypeKind::Delegate => TypeTreeNodeKind::Delegate,
        }
    }
}

/// One node of the browsable module tree. `handle` is the metadata token
/// accepted by the decompiler; assembly and namespace nodes carry 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTreeNode {
    pub name: String,
    pub kind: TypeTreeNodeKind,
    pub handle: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TypeTreeNode>,
}

impl TypeTreeNode {
    fn new(name: impl Into<String>, kind: TypeTreeNodeKind, handle: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            handle,
            children: Vec::new(),
        }
    }

    fn sort_recursive(&mut self) {
        self.children.sort_by(|a, b| a.name.cmp(&b.name));
        for child in &mut self.children {
            child.sort_recursive();
        }
    }

    /// Depth-first search by name path, e.g. `["Acme", "Widget", "Run"]`.
    pub fn find(&self, path: &[&str]) -> Option<&TypeTreeNode> {
        let (first, rest) = path.split_first()?;
        let child = self.children.iter().find(|c| c.name == *first)?;
        if rest.is_empty() {
            Some(child)
        } else {
            child.find(rest)
        }
    }
}

/// Root → namespace → type → {nested type, method, property}, ordinally sorted.
pub fn build_type_tree(reader: &ModuleReader) -> Result<TypeTreeNode> {
    let types = visible_types(reader)?;

    let mut nested: HashMap<u32, Vec<&TypeDefinition>> = HashMap::new();
    let mut namespaces: BTreeMap<&str, Vec<&TypeDefinition>> = BTreeMap::new();
    for ty in &types {
        match ty.enclosing_type {
            Some(outer) => nested.entry(outer).or_default().push(ty),
            None => {
                let namespace = if ty.namespace.is_empty() {
                    GLOBAL_NAMESPACE
                } else {
                    ty.namespace.as_str()
                };
                namespaces.entry(namespace).or_default().push(ty);
            }
        }
    }

    let root_name = match reader.assembly_identity()? {
        Some(identity) => identity.name,
        None => reader.module_name()?,
    };
    let mut root = TypeTreeNode::new(root_name, TypeTreeNodeKind::Assembly, 0);
    for (namespace, members) in namespaces {
        let mut node = TypeTreeNode::new(namespace, TypeTreeNodeKind::Namespace, 0);
        for ty in members {
            node.children.push(type_node(reader, ty, &nested, 0)?);
        }
        root.children.push(node);
    }

    root.sort_recursive();
    Ok(root)
}

fn type_node(
    reader: &ModuleReader,
    ty: &TypeDefinition,
    nested: &HashMap<u32, Vec<&TypeDefinition>>,
    depth: usize,
) -> Result<TypeTreeNode> {
    let mut node = TypeTreeNode::new(ty.name.clone(), ty.kind.into(), ty.handle);

    if depth < MAX_NESTING {
        for inner in nested.get(&ty.handle).into_iter().flatten() {
            node.children.push(type_node(reader, inner, nested, depth + 1)?);
        }
    }

    for method in reader.methods_of(ty)? {
        // accessors and operators surface through their property / owner instead
        if has_synthetic_name(&method.name) || (method.is_special_name() && !method.is_constructor())
        {
            continue;
        }
        node.children
            .push(TypeTreeNode::new(method.name, TypeTreeNodeKind::Method, method.handle));
    }

    for property in reader.properties_of(ty)? {
        if has_synthetic_name(&property.name) {
            continue;
        }
        node.children.push(TypeTreeNode::new(
            property.name,
            TypeTreeNodeKind::Property,
            property.handle,
        ));
    }

    Ok(node)
}
