//! Type, member and attribute enumeration on top of the raw tables.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use super::bytes::{slice, u16_at, u32_at, u8_at};
use super::signature::{self, MethodSig, TypeSig};
use super::tables::{split_token, CodedIndex, TableId};
use super::{BlobCursor, ModuleReader};
use crate::error::{MetadataError, Result};
use crate::model::{
    has_synthetic_name, FieldDefinition, MethodDefinition, PropertyDefinition, TypeDefinition,
    TypeKind, TypeReference, TypeVisibility, TYPE_INTERFACE,
};

const COMPILER_GENERATED: &str = "CompilerGeneratedAttribute";
const MAX_NESTING: usize = 32;

const METHOD_BODY_TINY: u8 = 0x2;
const METHOD_BODY_FAT: u8 = 0x3;
const METHOD_BODY_INIT_LOCALS: u16 = 0x10;

const SEMANTICS_SETTER: u32 = 0x0001;
const SEMANTICS_GETTER: u32 = 0x0002;

/// A decoded method body header plus its IL stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody<'a> {
    pub max_stack: u16,
    pub local_var_sig: u32,
    pub init_locals: bool,
    pub code: &'a [u8],
}

/// Cross-table facts needed to materialise TypeDefinitions in one pass.
struct TypeIndex {
    enclosing: HashMap<u32, u32>,
    interfaces: HashMap<u32, Vec<u32>>,
    compiler_generated: HashSet<u32>,
}

impl ModuleReader {
    fn type_index(&self) -> Result<TypeIndex> {
        let mut enclosing = HashMap::new();
        for row in 1..=self.row_count(TableId::NestedClass) {
            let nested = self.cell(TableId::NestedClass, row, 0)?;
            let outer = self.cell(TableId::NestedClass, row, 1)?;
            enclosing.insert(nested, outer);
        }

        let mut interfaces: HashMap<u32, Vec<u32>> = HashMap::new();
        for row in 1..=self.row_count(TableId::InterfaceImpl) {
            let class = self.cell(TableId::InterfaceImpl, row, 0)?;
            let iface = self.cell(TableId::InterfaceImpl, row, 1)?;
            interfaces.entry(class).or_default().push(iface);
        }

        let mut compiler_generated = HashSet::new();
        for row in 1..=self.row_count(TableId::CustomAttribute) {
            let parent = self.cell(TableId::CustomAttribute, row, 0)?;
            let Some((TableId::TypeDef, type_row)) = CodedIndex::HasCustomAttribute.decode(parent)
            else {
                continue;
            };
            if let Some((_, name)) = self.attribute_type_name(row)? {
                if name == COMPILER_GENERATED {
                    compiler_generated.insert(type_row);
                }
            }
        }

        Ok(TypeIndex {
            enclosing,
            interfaces,
            compiler_generated,
        })
    }

    /// Every TypeDef row, including `<Module>` and compiler-generated types.
    pub fn type_definitions(&self) -> Result<Vec<TypeDefinition>> {
        let index = self.type_index()?;
        (1..=self.row_count(TableId::TypeDef))
            .map(|row| self.build_type_definition(row, &index))
            .collect()
    }

    pub fn type_definition(&self, handle: u32) -> Result<TypeDefinition> {
        let (table, row) = split_token(handle);
        if table != TableId::TypeDef as u8 || row == 0 || row > self.row_count(TableId::TypeDef) {
            return Err(MetadataError::HandleNotFound(handle));
        }
        let index = self.type_index()?;
        self.build_type_definition(row, &index)
    }

    fn build_type_definition(&self, row: u32, index: &TypeIndex) -> Result<TypeDefinition> {
        let t = TableId::TypeDef;
        let flags = self.cell(t, row, 0)?;
        let name = self.string(self.cell(t, row, 1)?)?;
        let namespace = self.string(self.cell(t, row, 2)?)?;
        let full_name = self.type_def_full_name_with(row, &index.enclosing)?;
        let base_type = self.resolve_type_def_or_ref(self.cell(t, row, 3)?)?;

        let mut interfaces = Vec::new();
        for raw in index.interfaces.get(&row).into_iter().flatten() {
            if let Some(iface) = self.resolve_type_def_or_ref(*raw)? {
                interfaces.push(iface);
            }
        }

        let kind = classify(flags, base_type.as_ref(), &full_name);
        let is_synthetic =
            has_synthetic_name(&name) || index.compiler_generated.contains(&row);

        Ok(TypeDefinition {
            handle: t.token(row),
            name,
            namespace,
            full_name,
            flags,
            visibility: TypeVisibility::from_flags(flags),
            kind,
            base_type,
            interfaces,
            enclosing_type: index.enclosing.get(&row).map(|outer| t.token(*outer)),
            is_synthetic,
            field_rows: self.member_list(row, 4, TableId::FieldPtr, TableId::Field)?,
            method_rows: self.member_list(row, 5, TableId::MethodPtr, TableId::MethodDef)?,
        })
    }

    /// List positions owned by a TypeDef row, in the `*Ptr` table when present.
    fn member_list(
        &self,
        row: u32,
        col: usize,
        ptr: TableId,
        target: TableId,
    ) -> Result<Range<u32>> {
        let list = if self.row_count(ptr) > 0 { ptr } else { target };
        self.tables
            .list_range(&self.data, TableId::TypeDef, row, col, list)
    }

    fn resolve_list_position(&self, ptr: TableId, position: u32) -> Result<u32> {
        self.tables.indirect(&self.data, ptr, position)
    }

    fn type_def_full_name_with(&self, row: u32, enclosing: &HashMap<u32, u32>) -> Result<String> {
        let mut parts = Vec::new();
        let mut current = row;
        for _ in 0..MAX_NESTING {
            let name = self.string(self.cell(TableId::TypeDef, current, 1)?)?;
            match enclosing.get(&current) {
                Some(outer) => {
                    parts.push(name);
                    current = *outer;
                }
                None => {
                    let namespace = self.string(self.cell(TableId::TypeDef, current, 2)?)?;
                    parts.push(if namespace.is_empty() {
                        name
                    } else {
                        format!("{}.{}", namespace, name)
                    });
                    parts.reverse();
                    return Ok(parts.join("+"));
                }
            }
        }
        Err(MetadataError::invalid("nested type chain is cyclic"))
    }

    /// Full name of a TypeDef row, walking NestedClass for declaring types.
    pub(crate) fn type_def_full_name(&self, row: u32) -> Result<String> {
        let mut enclosing = HashMap::new();
        for nc in 1..=self.row_count(TableId::NestedClass) {
            enclosing.insert(
                self.cell(TableId::NestedClass, nc, 0)?,
                self.cell(TableId::NestedClass, nc, 1)?,
            );
        }
        self.type_def_full_name_with(row, &enclosing)
    }

    /// `(namespace, name, full name, scope)` of a TypeRef row.
    pub(crate) fn type_ref_parts(&self, row: u32) -> Result<(String, String, String, Option<String>)> {
        let mut chain = Vec::new();
        let mut current = row;
        for _ in 0..MAX_NESTING {
            let scope_raw = self.cell(TableId::TypeRef, current, 0)?;
            let name = self.string(self.cell(TableId::TypeRef, current, 1)?)?;
            let namespace = self.string(self.cell(TableId::TypeRef, current, 2)?)?;
            match CodedIndex::ResolutionScope.decode(scope_raw) {
                Some((TableId::TypeRef, outer)) => {
                    chain.push((namespace, name));
                    current = outer;
                }
                scope => {
                    let scope = match scope {
                        Some((TableId::AssemblyRef, r)) => {
                            Some(self.string(self.cell(TableId::AssemblyRef, r, 6)?)?)
                        }
                        Some((TableId::ModuleRef, r)) => {
                            Some(self.string(self.cell(TableId::ModuleRef, r, 0)?)?)
                        }
                        _ => None,
                    };
                    chain.push((namespace, name));
                    chain.reverse();
                    let full_name = chain
                        .iter()
                        .enumerate()
                        .map(|(i, (ns, n))| {
                            if i == 0 && !ns.is_empty() {
                                format!("{}.{}", ns, n)
                            } else {
                                n.clone()
                            }
                        })
                        .collect::<Vec<_>>()
                        .join("+");
                    let (namespace, name) = chain.pop().unwrap_or_default();
                    let namespace = if chain.is_empty() {
                        namespace
                    } else {
                        chain[0].0.clone()
                    };
                    return Ok((namespace, name, full_name, scope));
                }
            }
        }
        Err(MetadataError::invalid("nested type reference chain is cyclic"))
    }

    /// Resolves a TypeDefOrRef coded index. Generic instantiations (TypeSpec)
    /// resolve to their generic type definition; other specs yield `None`.
    pub(crate) fn resolve_type_def_or_ref(&self, raw: u32) -> Result<Option<TypeReference>> {
        match CodedIndex::TypeDefOrRef.decode(raw) {
            Some((table, row)) => self.resolve_type_token(table.token(row)),
            None => Ok(None),
        }
    }

    pub(crate) fn resolve_type_token(&self, token: u32) -> Result<Option<TypeReference>> {
        let (table, row) = split_token(token);
        match TableId::from_index(table) {
            Some(TableId::TypeDef) => Ok(Some(TypeReference::Internal {
                handle: token,
                full_name: self.type_def_full_name(row)?,
            })),
            Some(TableId::TypeRef) => {
                let (namespace, name, full_name, scope) = self.type_ref_parts(row)?;
                Ok(Some(TypeReference::External {
                    namespace,
                    name,
                    full_name,
                    scope,
                }))
            }
            Some(TableId::TypeSpec) => {
                let blob = self.blob(self.cell(TableId::TypeSpec, row, 0)?)?;
                match signature::parse_type_spec(blob)? {
                    TypeSig::GenericInst { generic, .. } => match *generic {
                        TypeSig::Named { token, .. } if split_token(token).0 != TableId::TypeSpec as u8 => {
                            self.resolve_type_token(token)
                        }
                        _ => Ok(None),
                    },
                    _ => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    /// `(namespace, name)` of a custom attribute's type.
    pub(crate) fn attribute_type_name(&self, ca_row: u32) -> Result<Option<(String, String)>> {
        let ctor = self.cell(TableId::CustomAttribute, ca_row, 1)?;
        let owner = match CodedIndex::CustomAttributeType.decode(ctor) {
            Some((TableId::MemberRef, row)) => {
                let parent = self.cell(TableId::MemberRef, row, 0)?;
                CodedIndex::MemberRefParent.decode(parent)
            }
            Some((TableId::MethodDef, row)) => self
                .method_owner(row)?
                .map(|type_row| (TableId::TypeDef, type_row)),
            _ => None,
        };
        match owner {
            Some((TableId::TypeRef, row)) => {
                let (namespace, name, _, _) = self.type_ref_parts(row)?;
                Ok(Some((namespace, name)))
            }
            Some((TableId::TypeDef, row)) => Ok(Some((
                self.string(self.cell(TableId::TypeDef, row, 2)?)?,
                self.string(self.cell(TableId::TypeDef, row, 1)?)?,
            ))),
            _ => Ok(None),
        }
    }

    fn attribute_ctor_signature(&self, ca_row: u32) -> Result<Option<MethodSig>> {
        let ctor = self.cell(TableId::CustomAttribute, ca_row, 1)?;
        let blob = match CodedIndex::CustomAttributeType.decode(ctor) {
            Some((TableId::MemberRef, row)) => self.blob(self.cell(TableId::MemberRef, row, 2)?)?,
            Some((TableId::MethodDef, row)) => self.blob(self.cell(TableId::MethodDef, row, 4)?)?,
            _ => return Ok(None),
        };
        signature::parse_method_sig(blob).map(Some)
    }

    /// First string argument of an assembly- or module-level attribute, matched
    /// by type name with or without the `Attribute` suffix.
    pub fn assembly_attribute(&self, name: &str) -> Result<Option<String>> {
        let long_name = format!("{}Attribute", name);
        for row in 1..=self.row_count(TableId::CustomAttribute) {
            let parent = self.cell(TableId::CustomAttribute, row, 0)?;
            if !matches!(
                CodedIndex::HasCustomAttribute.decode(parent),
                Some((TableId::Assembly, _)) | Some((TableId::Module, _))
            ) {
                continue;
            }
            let Some((_, type_name)) = self.attribute_type_name(row)? else {
                continue;
            };
            if type_name != name && type_name != long_name {
                continue;
            }
            let Some(ctor) = self.attribute_ctor_signature(row)? else {
                continue;
            };
            if ctor.params.first() != Some(&TypeSig::String) {
                continue;
            }
            let value = self.blob(self.cell(TableId::CustomAttribute, row, 2)?)?;
            let mut cursor = BlobCursor::new(value);
            if cursor.u16()? != 0x0001 {
                return Err(MetadataError::Signature(
                    "custom attribute blob without prolog".into(),
                ));
            }
            return cursor.ser_string();
        }
        Ok(None)
    }

    /// TypeDef row owning a MethodDef row.
    pub(crate) fn method_owner(&self, method_row: u32) -> Result<Option<u32>> {
        for type_row in 1..=self.row_count(TableId::TypeDef) {
            let positions = self.member_list(type_row, 5, TableId::MethodPtr, TableId::MethodDef)?;
            for position in positions {
                if self.resolve_list_position(TableId::MethodPtr, position)? == method_row {
                    return Ok(Some(type_row));
                }
            }
        }
        Ok(None)
    }

    /// TypeDef row owning a Field row.
    pub(crate) fn field_owner(&self, field_row: u32) -> Result<Option<u32>> {
        for type_row in 1..=self.row_count(TableId::TypeDef) {
            let positions = self.member_list(type_row, 4, TableId::FieldPtr, TableId::Field)?;
            for position in positions {
                if self.resolve_list_position(TableId::FieldPtr, position)? == field_row {
                    return Ok(Some(type_row));
                }
            }
        }
        Ok(None)
    }

    pub fn methods_of(&self, ty: &TypeDefinition) -> Result<Vec<MethodDefinition>> {
        ty.method_rows
            .clone()
            .map(|position| {
                let row = self.resolve_list_position(TableId::MethodPtr, position)?;
                self.build_method(row, ty.row())
            })
            .collect()
    }

    pub fn method(&self, handle: u32) -> Result<MethodDefinition> {
        let (table, row) = split_token(handle);
        if table != TableId::MethodDef as u8 || row == 0 || row > self.row_count(TableId::MethodDef) {
            return Err(MetadataError::HandleNotFound(handle));
        }
        let owner = self
            .method_owner(row)?
            .ok_or(MetadataError::HandleNotFound(handle))?;
        self.build_method(row, owner)
    }

    fn build_method(&self, row: u32, type_row: u32) -> Result<MethodDefinition> {
        let t = TableId::MethodDef;
        let list = if self.row_count(TableId::ParamPtr) > 0 {
            TableId::ParamPtr
        } else {
            TableId::Param
        };
        Ok(MethodDefinition {
            handle: t.token(row),
            rva: self.cell(t, row, 0)?,
            impl_flags: self.cell(t, row, 1)? as u16,
            flags: self.cell(t, row, 2)? as u16,
            name: self.string(self.cell(t, row, 3)?)?,
            declaring_type: TableId::TypeDef.token(type_row),
            signature_blob: self.cell(t, row, 4)?,
            param_rows: self.tables.list_range(&self.data, t, row, 5, list)?,
        })
    }

    pub fn method_signature(&self, method: &MethodDefinition) -> Result<MethodSig> {
        signature::parse_method_sig(self.blob(method.signature_blob)?)
    }

    /// `(sequence, name)` pairs from the Param table; sequence 0 is the return value.
    pub fn parameter_names(&self, method: &MethodDefinition) -> Result<Vec<(u16, String)>> {
        method
            .param_rows
            .clone()
            .map(|position| {
                let row = self.resolve_list_position(TableId::ParamPtr, position)?;
                Ok((
                    self.cell(TableId::Param, row, 1)? as u16,
                    self.string(self.cell(TableId::Param, row, 2)?)?,
                ))
            })
            .collect()
    }

    pub fn fields_of(&self, ty: &TypeDefinition) -> Result<Vec<FieldDefinition>> {
        ty.field_rows
            .clone()
            .map(|position| {
                let row = self.resolve_list_position(TableId::FieldPtr, position)?;
                self.build_field(row)
            })
            .collect()
    }

    pub fn field(&self, handle: u32) -> Result<FieldDefinition> {
        let (table, row) = split_token(handle);
        if table != TableId::Field as u8 || row == 0 || row > self.row_count(TableId::Field) {
            return Err(MetadataError::HandleNotFound(handle));
        }
        self.build_field(row)
    }

    fn build_field(&self, row: u32) -> Result<FieldDefinition> {
        let t = TableId::Field;
        Ok(FieldDefinition {
            handle: t.token(row),
            flags: self.cell(t, row, 0)? as u16,
            name: self.string(self.cell(t, row, 1)?)?,
            signature_blob: self.cell(t, row, 2)?,
        })
    }

    pub fn field_type(&self, field: &FieldDefinition) -> Result<TypeSig> {
        signature::parse_field_sig(self.blob(field.signature_blob)?)
    }

    fn property_list(&self, map_row: u32) -> Result<Range<u32>> {
        let list = if self.row_count(TableId::PropertyPtr) > 0 {
            TableId::PropertyPtr
        } else {
            TableId::Property
        };
        self.tables
            .list_range(&self.data, TableId::PropertyMap, map_row, 1, list)
    }

    pub fn properties_of(&self, ty: &TypeDefinition) -> Result<Vec<PropertyDefinition>> {
        for map_row in 1..=self.row_count(TableId::PropertyMap) {
            if self.cell(TableId::PropertyMap, map_row, 0)? != ty.row() {
                continue;
            }
            return self
                .property_list(map_row)?
                .map(|position| {
                    let row = self.resolve_list_position(TableId::PropertyPtr, position)?;
                    self.build_property(row, ty.row())
                })
                .collect();
        }
        Ok(Vec::new())
    }

    pub fn property(&self, handle: u32) -> Result<PropertyDefinition> {
        let (table, row) = split_token(handle);
        if table != TableId::Property as u8 || row == 0 || row > self.row_count(TableId::Property) {
            return Err(MetadataError::HandleNotFound(handle));
        }
        for map_row in 1..=self.row_count(TableId::PropertyMap) {
            for position in self.property_list(map_row)? {
                if self.resolve_list_position(TableId::PropertyPtr, position)? == row {
                    let owner = self.cell(TableId::PropertyMap, map_row, 0)?;
                    return self.build_property(row, owner);
                }
            }
        }
        Err(MetadataError::HandleNotFound(handle))
    }

    fn build_property(&self, row: u32, type_row: u32) -> Result<PropertyDefinition> {
        let t = TableId::Property;
        Ok(PropertyDefinition {
            handle: t.token(row),
            flags: self.cell(t, row, 0)? as u16,
            name: self.string(self.cell(t, row, 1)?)?,
            declaring_type: TableId::TypeDef.token(type_row),
            signature_blob: self.cell(t, row, 2)?,
        })
    }

    pub fn property_type(&self, property: &PropertyDefinition) -> Result<TypeSig> {
        signature::parse_property_sig(self.blob(property.signature_blob)?)
    }

    /// `(has_getter, has_setter)` from MethodSemantics.
    pub fn property_accessors(&self, property: &PropertyDefinition) -> Result<(bool, bool)> {
        let row = property.handle & 0x00FF_FFFF;
        let mut getter = false;
        let mut setter = false;
        for sem in 1..=self.row_count(TableId::MethodSemantics) {
            let association = self.cell(TableId::MethodSemantics, sem, 2)?;
            if CodedIndex::HasSemantics.decode(association) != Some((TableId::Property, row)) {
                continue;
            }
            let semantics = self.cell(TableId::MethodSemantics, sem, 0)?;
            getter |= semantics & SEMANTICS_GETTER != 0;
            setter |= semantics & SEMANTICS_SETTER != 0;
        }
        Ok((getter, setter))
    }

    /// Method body at the method's RVA; `None` for abstract, extern and runtime methods.
    pub fn method_body(&self, method: &MethodDefinition) -> Result<Option<MethodBody<'_>>> {
        if method.rva == 0 {
            return Ok(None);
        }
        let offset = self
            .pe
            .rva_to_offset(method.rva)
            .ok_or_else(|| MetadataError::invalid(format!("method RVA {:#x} is unmapped", method.rva)))?;
        let head = u8_at(&self.data, offset, "method header")?;
        match head & 0x3 {
            METHOD_BODY_TINY => {
                let size = (head >> 2) as usize;
                Ok(Some(MethodBody {
                    max_stack: 8,
                    local_var_sig: 0,
                    init_locals: false,
                    code: slice(&self.data, offset + 1, size, "method body")?,
                }))
            }
            METHOD_BODY_FAT => {
                let flags = u16_at(&self.data, offset, "method header")?;
                let header_size = ((flags >> 12) as usize) * 4;
                let code_size = u32_at(&self.data, offset + 4, "method header")? as usize;
                Ok(Some(MethodBody {
                    max_stack: u16_at(&self.data, offset + 2, "method header")?,
                    local_var_sig: u32_at(&self.data, offset + 8, "method header")?,
                    init_locals: flags & METHOD_BODY_INIT_LOCALS != 0,
                    code: slice(&self.data, offset + header_size, code_size, "method body")?,
                }))
            }
            other => Err(MetadataError::invalid(format!(
                "unknown method header format {:#x}",
                other
            ))),
        }
    }
}

fn classify(flags: u32, base: Option<&TypeReference>, full_name: &str) -> TypeKind {
    if flags & TYPE_INTERFACE != 0 {
        return TypeKind::Interface;
    }
    match base.map(|b| b.full_name()) {
        Some("System.Enum") => TypeKind::Enum,
        Some("System.ValueType") if full_name != "System.Enum" => TypeKind::Struct,
        Some("System.MulticastDelegate") => TypeKind::Delegate,
        _ => TypeKind::Class,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TYPE_SEALED;
    use crate::testing::{ModuleBuilder, TypeDecl};

    fn sample() -> ModuleReader {
        let mut builder = ModuleBuilder::new("Sample");
        let object = builder.type_ref("System", "Object");
        let value_type = builder.type_ref("System", "ValueType");
        let disposable = builder.type_ref("System", "IDisposable");

        let widget = builder.add_type(TypeDecl::class("Acme", "Widget").extends(object));
        builder.add_method(widget, "Run", false);
        builder.add_method(widget, ".ctor", true);
        builder.add_field(widget, "count");
        builder.add_property(widget, "Name");
        builder.implements(widget, disposable);

        builder.add_type(
            TypeDecl::class("Acme", "Point")
                .extends(value_type)
                .flags(0x0000_0001 | TYPE_SEALED),
        );
        let nested = builder.add_type(TypeDecl::class("", "Inner").extends(object));
        builder.nest(nested, widget);

        ModuleReader::from_bytes(builder.build()).unwrap()
    }

    #[test]
    fn test_type_definitions_resolve_bases_and_interfaces() {
        let reader = sample();
        let types = reader.type_definitions().unwrap();
        assert_eq!(types.len(), 4);
        assert_eq!(types[0].name, "<Module>");
        assert!(types[0].is_synthetic);

        let widget = &types[1];
        assert_eq!(widget.full_name, "Acme.Widget");
        assert_eq!(widget.handle, 0x0200_0002);
        assert_eq!(widget.base_type_name(), Some("System.Object"));
        assert_eq!(widget.interfaces.len(), 1);
        assert_eq!(widget.interfaces[0].full_name(), "System.IDisposable");
        assert_eq!(widget.kind, TypeKind::Class);

        assert_eq!(types[2].kind, TypeKind::Struct);

        let inner = &types[3];
        assert_eq!(inner.full_name, "Acme.Widget+Inner");
        assert_eq!(inner.enclosing_type, Some(widget.handle));
    }

    #[test]
    fn test_members_of_type() {
        let reader = sample();
        let widget = reader.type_definition(0x0200_0002).unwrap();

        let methods = reader.methods_of(&widget).unwrap();
        let names: Vec<_> = methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Run", ".ctor"]);
        assert!(methods[1].is_special_name());
        assert_eq!(methods[0].declaring_type, widget.handle);

        let fields = reader.fields_of(&widget).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "count");
        assert_eq!(reader.field_type(&fields[0]).unwrap(), TypeSig::I4);

        let props = reader.properties_of(&widget).unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].name, "Name");
        assert_eq!(reader.property_type(&props[0]).unwrap(), TypeSig::String);
    }

    #[test]
    fn test_method_lookup_by_handle() {
        let reader = sample();
        let method = reader.method(0x0600_0001).unwrap();
        assert_eq!(method.name, "Run");
        assert_eq!(method.declaring_type, 0x0200_0002);

        let err = reader.method(0x0600_0099).unwrap_err();
        assert!(matches!(err, MetadataError::HandleNotFound(0x0600_0099)));
        assert!(reader.type_definition(0x0600_0001).is_err());
    }

    #[test]
    fn test_method_body_is_decoded() {
        let reader = sample();
        let method = reader.method(0x0600_0001).unwrap();
        let body = reader.method_body(&method).unwrap().unwrap();
        // builder emits `ret` for every body
        assert_eq!(body.code, &[0x2A]);
        assert_eq!(body.max_stack, 8);
    }

    #[test]
    fn test_compiler_generated_attribute_marks_type_synthetic() {
        let mut builder = ModuleBuilder::new("Gen");
        let object = builder.type_ref("System", "Object");
        let closure = builder.add_type(TypeDecl::class("Acme", "Helper").extends(object));
        builder.mark_compiler_generated(closure);

        let reader = ModuleReader::from_bytes(builder.build()).unwrap();
        let helper = reader.type_definition(0x0200_0002).unwrap();
        assert!(helper.is_synthetic);
    }

    #[test]
    fn test_assembly_attribute_reads_string_argument() {
        let mut builder = ModuleBuilder::new("Attrs");
        builder.assembly_attribute("System.Reflection", "AssemblyTitleAttribute", Some("Tool"));
        let reader = ModuleReader::from_bytes(builder.build()).unwrap();

        assert_eq!(
            reader.assembly_attribute("AssemblyTitle").unwrap().as_deref(),
            Some("Tool")
        );
        assert_eq!(reader.assembly_attribute("AssemblyCompany").unwrap(), None);
    }
}
