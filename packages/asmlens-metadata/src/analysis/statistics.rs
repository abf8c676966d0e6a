use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::visible_types;
use crate::error::Result;
use crate::model::TypeDefinition;
use crate::reader::ModuleReader;

const VALUE_TYPE_BASE: &str = "System.ValueType";

/// Counters over the non-synthetic types of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStatistics {
    pub namespace_count: usize,
    pub type_count: usize,
    pub class_count: usize,
    pub interface_count: usize,
    pub struct_count: usize,
    /// Excludes special-name members (constructors, accessors, operators)
    pub method_count: usize,
    pub property_count: usize,
}

enum Shape {
    Class,
    Interface,
    Struct,
}

fn shape_of(ty: &TypeDefinition) -> Shape {
    if ty.is_interface() {
        Shape::Interface
    } else if ty.is_sealed() && ty.base_type_name() == Some(VALUE_TYPE_BASE) {
        Shape::Struct
    } else {
        Shape::Class
    }
}

pub fn collect_statistics(reader: &ModuleReader) -> Result<ModuleStatistics> {
    let mut stats = ModuleStatistics::default();
    let mut namespaces = HashSet::new();

    for ty in visible_types(reader)? {
        if !ty.namespace.is_empty() {
            namespaces.insert(ty.namespace.clone());
        }
        stats.type_count += 1;
        match shape_of(&ty) {
            Shape::Interface => stats.interface_count += 1,
            Shape::Struct => stats.struct_count += 1,
            Shape::Class => stats.class_count += 1,
        }
        stats.method_count += reader
            .methods_of(&ty)?
            .iter()
            .filter(|m| !m.is_special_name())
            .count();
        stats.property_count += reader.properties_of(&ty)?.len();
    }

    stats.namespace_count = namespaces.len();
    Ok(stats)
}
