//! Entities enumerated by [`crate::ModuleReader`].

use serde::{Deserialize, Serialize};
use std::ops::Range;

pub const TYPE_VISIBILITY_MASK: u32 = 0x0000_0007;
pub const TYPE_INTERFACE: u32 = 0x0000_0020;
pub const TYPE_ABSTRACT: u32 = 0x0000_0080;
pub const TYPE_SEALED: u32 = 0x0000_0100;

pub const METHOD_ACCESS_MASK: u16 = 0x0007;
pub const METHOD_STATIC: u16 = 0x0010;
pub const METHOD_FINAL: u16 = 0x0020;
pub const METHOD_VIRTUAL: u16 = 0x0040;
pub const METHOD_ABSTRACT: u16 = 0x0400;
pub const METHOD_SPECIAL_NAME: u16 = 0x0800;

pub const FIELD_STATIC: u16 = 0x0010;
pub const FIELD_INIT_ONLY: u16 = 0x0020;
pub const FIELD_LITERAL: u16 = 0x0040;

pub const ASSEMBLY_FLAG_PUBLIC_KEY: u32 = 0x0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeVisibility {
    NotPublic,
    Public,
    NestedPublic,
    NestedPrivate,
    NestedFamily,
    NestedAssembly,
    NestedFamAndAssem,
    NestedFamOrAssem,
}

impl TypeVisibility {
    pub fn from_flags(flags: u32) -> Self {
        match flags & TYPE_VISIBILITY_MASK {
            1 => TypeVisibility::Public,
            2 => TypeVisibility::NestedPublic,
            3 => TypeVisibility::NestedPrivate,
            4 => TypeVisibility::NestedFamily,
            5 => TypeVisibility::NestedAssembly,
            6 => TypeVisibility::NestedFamAndAssem,
            7 => TypeVisibility::NestedFamOrAssem,
            _ => TypeVisibility::NotPublic,
        }
    }

    /// C# modifier keyword(s)
    pub fn keyword(self) -> &'static str {
        match self {
            TypeVisibility::Public | TypeVisibility::NestedPublic => "public",
            TypeVisibility::NotPublic | TypeVisibility::NestedAssembly => "internal",
            TypeVisibility::NestedPrivate => "private",
            TypeVisibility::NestedFamily => "protected",
            TypeVisibility::NestedFamAndAssem => "private protected",
            TypeVisibility::NestedFamOrAssem => "protected internal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Class,
    Interface,
    Struct,
    Enum,
    Delegate,
}

impl TypeKind {
    pub fn keyword(self) -> &'static str {
        match self {
            TypeKind::Class => "class",
            TypeKind::Interface => "interface",
            TypeKind::Struct => "struct",
            TypeKind::Enum => "enum",
            TypeKind::Delegate => "delegate",
        }
    }
}

/// A base type or implemented interface as seen from a TypeDef.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum TypeReference {
    /// Defined in this module
    Internal { handle: u32, full_name: String },
    /// TypeRef into another module
    External {
        namespace: String,
        name: String,
        full_name: String,
        scope: Option<String>,
    },
}

impl TypeReference {
    pub fn full_name(&self) -> &str {
        match self {
            TypeReference::Internal { full_name, .. } | TypeReference::External { full_name, .. } => {
                full_name
            }
        }
    }

    pub fn is_system_object(&self) -> bool {
        self.full_name() == "System.Object"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefinition {
    pub handle: u32,
    pub name: String,
    pub namespace: String,
    pub full_name: String,
    pub flags: u32,
    pub visibility: TypeVisibility,
    pub kind: TypeKind,
    pub base_type: Option<TypeReference>,
    pub interfaces: Vec<TypeReference>,
    /// TypeDef handle of the declaring type for nested types
    pub enclosing_type: Option<u32>,
    /// Compiler-synthesised implementation detail (closure classes, `<Module>`, ...)
    pub is_synthetic: bool,
    pub(crate) field_rows: Range<u32>,
    pub(crate) method_rows: Range<u32>,
}

impl TypeDefinition {
    pub fn row(&self) -> u32 {
        self.handle & 0x00FF_FFFF
    }

    pub fn is_interface(&self) -> bool {
        self.flags & TYPE_INTERFACE != 0
    }

    pub fn is_sealed(&self) -> bool {
        self.flags & TYPE_SEALED != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.flags & TYPE_ABSTRACT != 0
    }

    pub fn is_nested(&self) -> bool {
        self.enclosing_type.is_some()
    }

    pub fn base_type_name(&self) -> Option<&str> {
        self.base_type.as_ref().map(|b| b.full_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDefinition {
    pub handle: u32,
    pub name: String,
    pub flags: u16,
    pub impl_flags: u16,
    pub rva: u32,
    pub declaring_type: u32,
    pub(crate) signature_blob: u32,
    pub(crate) param_rows: Range<u32>,
}

impl MethodDefinition {
    pub fn is_special_name(&self) -> bool {
        self.flags & METHOD_SPECIAL_NAME != 0
    }

    pub fn is_static(&self) -> bool {
        self.flags & METHOD_STATIC != 0
    }

    pub fn is_constructor(&self) -> bool {
        self.is_special_name() && (self.name == ".ctor" || self.name == ".cctor")
    }

    pub fn access_keyword(&self) -> &'static str {
        member_access_keyword(self.flags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub handle: u32,
    pub name: String,
    pub flags: u16,
    pub(crate) signature_blob: u32,
}

impl FieldDefinition {
    pub fn access_keyword(&self) -> &'static str {
        member_access_keyword(self.flags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDefinition {
    pub handle: u32,
    pub name: String,
    pub flags: u16,
    pub declaring_type: u32,
    pub(crate) signature_blob: u32,
}

/// Assembly identity as it appears in an Assembly or AssemblyRef row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssemblyIdentity {
    pub name: String,
    pub version: String,
    pub culture: String,
    pub public_key_token: Option<String>,
}

impl AssemblyIdentity {
    /// Display name in the `Name, Version=..., Culture=..., PublicKeyToken=...` form
    pub fn display_name(&self) -> String {
        format!(
            "{}, Version={}, Culture={}, PublicKeyToken={}",
            self.name,
            self.version,
            self.culture,
            self.public_key_token.as_deref().unwrap_or("null")
        )
    }
}

pub(crate) fn member_access_keyword(flags: u16) -> &'static str {
    match flags & METHOD_ACCESS_MASK {
        1 => "private",
        2 => "private protected",
        3 => "internal",
        4 => "protected",
        5 => "protected internal",
        6 => "public",
        _ => "private",
    }
}

/// Name-shape heuristic for compiler-generated entities: `<Module>`,
/// `<>c__DisplayClass0_0`, `<Main>d__1`, `<PrivateImplementationDetails>` ...
pub fn has_synthetic_name(name: &str) -> bool {
    name.contains('<') || name.contains('>')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_from_flags() {
        assert_eq!(TypeVisibility::from_flags(0x0010_0001), TypeVisibility::Public);
        assert_eq!(TypeVisibility::from_flags(0), TypeVisibility::NotPublic);
        assert_eq!(TypeVisibility::from_flags(3).keyword(), "private");
    }

    #[test]
    fn test_synthetic_names() {
        assert!(has_synthetic_name("<Module>"));
        assert!(has_synthetic_name("<>c__DisplayClass3_0"));
        assert!(has_synthetic_name("<Run>d__4"));
        assert!(!has_synthetic_name("List`1"));
        assert!(!has_synthetic_name("Widget"));
    }

    #[test]
    fn test_display_name_uses_null_token() {
        let id = AssemblyIdentity {
            name: "Acme".into(),
            version: "1.2.3.4".into(),
            culture: "neutral".into(),
            public_key_token: None,
        };
        assert_eq!(
            id.display_name(),
            "Acme, Version=1.2.3.4, Culture=neutral, PublicKeyToken=null"
        );
    }
}
