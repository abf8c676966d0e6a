//! In-memory synthesis of small managed modules for tests.
//!
//! `ModuleBuilder` emits a PE32 image with a single `.text` section holding
//! the CLI header, method bodies and a metadata root with the five standard
//! streams. Rows are laid out with the same `compute_layouts` the reader uses.
//!
//! Members must be added grouped by owner in declaration order (all of one
//! type's methods before the next type's), mirroring how the MethodList and
//! FieldList columns partition their tables.

use std::collections::{BTreeMap, HashMap};

use crate::model::{ASSEMBLY_FLAG_PUBLIC_KEY, TYPE_ABSTRACT, TYPE_INTERFACE, TYPE_SEALED};
use crate::reader::tables::{compute_layouts, split_token, CodedIndex, TableId, TABLE_COUNT};

const TYPE_PUBLIC: u32 = 0x0000_0001;
const METHOD_PUBLIC: u16 = 0x0006;
const METHOD_HIDE_BY_SIG: u16 = 0x0080;
const METHOD_SPECIAL: u16 = 0x0800 | 0x1000;
const FIELD_PRIVATE: u16 = 0x0001;

const SECTION_RVA: u32 = 0x2000;
const SECTION_RAW: usize = 0x200;
const CLI_HEADER_SIZE: usize = 72;

/// Declaration of a TypeDef row.
#[derive(Debug, Clone)]
pub struct TypeDecl {
    namespace: String,
    name: String,
    flags: u32,
    extends: Option<u32>,
}

impl TypeDecl {
    pub fn class(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            flags: TYPE_PUBLIC,
            extends: None,
        }
    }

    pub fn interface(namespace: &str, name: &str) -> Self {
        Self {
            flags: TYPE_PUBLIC | TYPE_INTERFACE | TYPE_ABSTRACT,
            ..Self::class(namespace, name)
        }
    }

    /// `struct` shape: sealed and extending the given `System.ValueType` reference
    pub fn value_type(namespace: &str, name: &str, value_type: u32) -> Self {
        Self {
            flags: TYPE_PUBLIC | TYPE_SEALED,
            extends: Some(value_type),
            ..Self::class(namespace, name)
        }
    }

    /// Base type as a TypeDef, TypeRef or TypeSpec token
    pub fn extends(mut self, token: u32) -> Self {
        self.extends = Some(token);
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }
}

struct TypeRow {
    decl: TypeDecl,
}

struct MethodRow {
    owner: u32,
    flags: u16,
    name: u32,
    signature: u32,
    body: Option<Vec<u8>>,
    first_param: u32,
}

struct MemberRow {
    owner: u32,
    flags: u16,
    name: u32,
    signature: u32,
}

pub struct ModuleBuilder {
    assembly_name: String,
    module_name: String,
    version: [u16; 4],
    public_key: Vec<u8>,
    cli_flags: u32,
    entry_point: u32,
    strings: Vec<u8>,
    string_index: HashMap<String, u32>,
    blobs: Vec<u8>,
    user_strings: Vec<u8>,
    type_refs: Vec<[u32; 3]>,
    types: Vec<TypeRow>,
    fields: Vec<MemberRow>,
    methods: Vec<MethodRow>,
    params: Vec<[u32; 3]>,
    interface_impls: Vec<[u32; 2]>,
    member_refs: Vec<[u32; 3]>,
    custom_attributes: Vec<[u32; 3]>,
    properties: Vec<MemberRow>,
    method_semantics: Vec<[u32; 3]>,
    type_specs: Vec<u32>,
    assembly_refs: Vec<[u32; 9]>,
    nested: Vec<[u32; 2]>,
    compiler_generated_ctor: Option<u32>,
}

impl ModuleBuilder {
    pub fn new(assembly_name: &str) -> Self {
        let mut builder = Self {
            assembly_name: assembly_name.to_string(),
            module_name: format!("{}.dll", assembly_name),
            version: [1, 0, 0, 0],
            public_key: Vec::new(),
            cli_flags: 0x0000_0001,
            entry_point: 0,
            strings: vec![0],
            string_index: HashMap::new(),
            blobs: vec![0],
            user_strings: vec![0],
            type_refs: Vec::new(),
            types: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            params: Vec::new(),
            interface_impls: Vec::new(),
            member_refs: Vec::new(),
            custom_attributes: Vec::new(),
            properties: Vec::new(),
            method_semantics: Vec::new(),
            type_specs: Vec::new(),
            assembly_refs: Vec::new(),
            nested: Vec::new(),
            compiler_generated_ctor: None,
        };
        builder.string("<Module>");
        builder.types.push(TypeRow {
            decl: TypeDecl {
                namespace: String::new(),
                name: "<Module>".to_string(),
                flags: 0,
                extends: None,
            },
        });
        builder
    }

    pub fn version(&mut self, major: u16, minor: u16, build: u16, revision: u16) -> &mut Self {
        self.version = [major, minor, build, revision];
        self
    }

    pub fn public_key(&mut self, key: &[u8]) -> &mut Self {
        self.public_key = key.to_vec();
        self
    }

    /// Names the module `<assembly>.exe` and records an entry point.
    pub fn executable(&mut self, entry_point: u32) -> &mut Self {
        self.module_name = format!("{}.exe", self.assembly_name);
        self.entry_point = entry_point;
        self
    }

    pub fn cli_flags(&mut self, flags: u32) -> &mut Self {
        self.cli_flags = flags;
        self
    }

    fn string(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }
        if let Some(index) = self.string_index.get(value) {
            return *index;
        }
        let index = self.strings.len() as u32;
        self.strings.extend_from_slice(value.as_bytes());
        self.strings.push(0);
        self.string_index.insert(value.to_string(), index);
        index
    }

    fn blob(&mut self, value: &[u8]) -> u32 {
        if value.is_empty() {
            return 0;
        }
        let index = self.blobs.len() as u32;
        self.blobs.extend(compress(value.len() as u32));
        self.blobs.extend_from_slice(value);
        index
    }

    /// Adds a `#US` literal and returns its `ldstr` token.
    pub fn user_string(&mut self, value: &str) -> u32 {
        let offset = self.user_strings.len() as u32;
        let units: Vec<u16> = value.encode_utf16().collect();
        self.user_strings
            .extend(compress(units.len() as u32 * 2 + 1));
        for unit in units {
            self.user_strings.extend_from_slice(&unit.to_le_bytes());
        }
        self.user_strings.push(0);
        0x7000_0000 | offset
    }

    /// TypeRef with a null resolution scope.
    pub fn type_ref(&mut self, namespace: &str, name: &str) -> u32 {
        self.type_ref_scoped(0, namespace, name)
    }

    /// TypeRef resolved through an AssemblyRef token.
    pub fn type_ref_in(&mut self, assembly_ref: u32, namespace: &str, name: &str) -> u32 {
        let (_, row) = split_token(assembly_ref);
        let scope = CodedIndex::ResolutionScope.encode(TableId::AssemblyRef, row);
        self.type_ref_scoped(scope, namespace, name)
    }

    fn type_ref_scoped(&mut self, scope: u32, namespace: &str, name: &str) -> u32 {
        let row = [scope, self.string(name), self.string(namespace)];
        self.type_refs.push(row);
        TableId::TypeRef.token(self.type_refs.len() as u32)
    }

    /// `GenericInst` TypeSpec over `generic` with `int32` arguments.
    pub fn generic_instance(&mut self, generic: u32, arity: u32) -> u32 {
        let mut sig = vec![0x15, 0x12];
        sig.extend(compress(type_def_or_ref(generic)));
        sig.extend(compress(arity));
        for _ in 0..arity {
            sig.push(0x08);
        }
        let blob = self.blob(&sig);
        self.type_specs.push(blob);
        TableId::TypeSpec.token(self.type_specs.len() as u32)
    }

    pub fn assembly_ref(
        &mut self,
        name: &str,
        version: [u16; 4],
        key_or_token: &[u8],
        culture: &str,
    ) -> u32 {
        let flags = if key_or_token.len() > 8 {
            ASSEMBLY_FLAG_PUBLIC_KEY
        } else {
            0
        };
        let row = [
            u32::from(version[0]),
            u32::from(version[1]),
            u32::from(version[2]),
            u32::from(version[3]),
            flags,
            self.blob(key_or_token),
            self.string(name),
            self.string(culture),
            0,
        ];
        self.assembly_refs.push(row);
        TableId::AssemblyRef.token(self.assembly_refs.len() as u32)
    }

    pub fn add_type(&mut self, decl: TypeDecl) -> u32 {
        self.string(&decl.name);
        self.string(&decl.namespace);
        self.types.push(TypeRow { decl });
        TableId::TypeDef.token(self.types.len() as u32)
    }

    /// Records `nested` as declared inside `enclosing`.
    pub fn nest(&mut self, nested: u32, enclosing: u32) {
        self.nested
            .push([split_token(nested).1, split_token(enclosing).1]);
    }

    pub fn implements(&mut self, ty: u32, interface: u32) {
        self.interface_impls
            .push([split_token(ty).1, type_def_or_ref(interface)]);
    }

    /// Private `int32` field.
    pub fn add_field(&mut self, ty: u32, name: &str) -> u32 {
        let owner = self.owner_row(ty, self.fields.last().map(|f| f.owner));
        let row = MemberRow {
            owner,
            flags: FIELD_PRIVATE,
            name: self.string(name),
            signature: self.blob(&[0x06, 0x08]),
        };
        self.fields.push(row);
        TableId::Field.token(self.fields.len() as u32)
    }

    /// Public instance `void Name()`; `special` marks constructors and accessors.
    pub fn add_method(&mut self, ty: u32, name: &str, special: bool) -> u32 {
        let mut flags = METHOD_PUBLIC | METHOD_HIDE_BY_SIG;
        if special {
            flags |= METHOD_SPECIAL;
        }
        self.push_method(ty, name, flags, vec![0x20, 0x00, 0x01], &[])
    }

    /// Public static `int32 Name(int32 a, int32 b, ...)` with Param rows.
    pub fn add_static_method(&mut self, ty: u32, name: &str, params: &[&str]) -> u32 {
        let mut sig = vec![0x00];
        sig.extend(compress(params.len() as u32));
        sig.push(0x08);
        sig.extend(std::iter::repeat(0x08).take(params.len()));
        self.push_method(
            ty,
            name,
            METHOD_PUBLIC | METHOD_HIDE_BY_SIG | 0x0010,
            sig,
            params,
        )
    }

    fn push_method(
        &mut self,
        ty: u32,
        name: &str,
        flags: u16,
        signature: Vec<u8>,
        params: &[&str],
    ) -> u32 {
        let owner = self.owner_row(ty, self.methods.last().map(|m| m.owner));
        let first_param = self.params.len() as u32 + 1;
        for (i, param) in params.iter().enumerate() {
            let row = [0, i as u32 + 1, self.string(param)];
            self.params.push(row);
        }
        let row = MethodRow {
            owner,
            flags,
            name: self.string(name),
            signature: self.blob(&signature),
            body: Some(vec![0x2A]),
            first_param,
        };
        self.methods.push(row);
        TableId::MethodDef.token(self.methods.len() as u32)
    }

    /// Replaces a method's IL stream; `None` makes it abstract-like (RVA 0).
    pub fn with_body(&mut self, method: u32, il: Option<Vec<u8>>) -> &mut Self {
        let index = split_token(method).1 as usize - 1;
        self.methods[index].body = il;
        self
    }

    /// `string Name` property row; link accessors with [`ModuleBuilder::accessors`].
    pub fn add_property(&mut self, ty: u32, name: &str) -> u32 {
        let owner = self.owner_row(ty, self.properties.last().map(|p| p.owner));
        let row = MemberRow {
            owner,
            flags: 0,
            name: self.string(name),
            signature: self.blob(&[0x28, 0x00, 0x0E]),
        };
        self.properties.push(row);
        TableId::Property.token(self.properties.len() as u32)
    }

    /// Links a property to its getter/setter methods via MethodSemantics.
    pub fn accessors(&mut self, property: u32, getter: Option<u32>, setter: Option<u32>) {
        let association = CodedIndex::HasSemantics.encode(TableId::Property, split_token(property).1);
        if let Some(getter) = getter {
            self.method_semantics
                .push([0x0002, split_token(getter).1, association]);
        }
        if let Some(setter) = setter {
            self.method_semantics
                .push([0x0001, split_token(setter).1, association]);
        }
    }

    pub fn mark_compiler_generated(&mut self, ty: u32) {
        let ctor = match self.compiler_generated_ctor {
            Some(ctor) => ctor,
            None => {
                let attr = self.type_ref("System.Runtime.CompilerServices", "CompilerGeneratedAttribute");
                let ctor = self.member_ref(attr, ".ctor", &[0x20, 0x00, 0x01]);
                self.compiler_generated_ctor = Some(ctor);
                ctor
            }
        };
        let parent = CodedIndex::HasCustomAttribute.encode(TableId::TypeDef, split_token(ty).1);
        let value = self.blob(&[0x01, 0x00, 0x00, 0x00]);
        self.custom_attributes.push([
            parent,
            CodedIndex::CustomAttributeType.encode(TableId::MemberRef, ctor),
            value,
        ]);
    }

    /// Assembly-level attribute whose constructor takes one string.
    pub fn assembly_attribute(&mut self, namespace: &str, name: &str, value: Option<&str>) {
        let attr = self.type_ref(namespace, name);
        let ctor = self.member_ref(attr, ".ctor", &[0x20, 0x01, 0x01, 0x0E]);
        let mut blob = vec![0x01, 0x00];
        match value {
            Some(text) => {
                blob.extend(compress(text.len() as u32));
                blob.extend_from_slice(text.as_bytes());
            }
            None => blob.push(0xFF),
        }
        blob.extend_from_slice(&[0x00, 0x00]);
        let value = self.blob(&blob);
        self.custom_attributes.push([
            CodedIndex::HasCustomAttribute.encode(TableId::Assembly, 1),
            CodedIndex::CustomAttributeType.encode(TableId::MemberRef, ctor),
            value,
        ]);
    }

    /// MemberRef on a TypeRef parent; returns the MemberRef row.
    fn member_ref(&mut self, parent: u32, name: &str, signature: &[u8]) -> u32 {
        let row = [
            CodedIndex::MemberRefParent.encode(TableId::TypeRef, split_token(parent).1),
            self.string(name),
            self.blob(signature),
        ];
        self.member_refs.push(row);
        self.member_refs.len() as u32
    }

    /// MemberRef token for a `void Name()` instance method on a TypeRef.
    pub fn method_ref(&mut self, parent: u32, name: &str) -> u32 {
        TableId::MemberRef.token(self.member_ref(parent, name, &[0x20, 0x00, 0x01]))
    }

    fn owner_row(&self, ty: u32, last_owner: Option<u32>) -> u32 {
        let (table, row) = split_token(ty);
        assert_eq!(table, TableId::TypeDef as u8, "members belong to TypeDefs");
        assert!(
            last_owner.map_or(true, |last| last <= row),
            "members must be added grouped by type in declaration order"
        );
        row
    }

    /// Serialises the module image.
    pub fn build(&self) -> Vec<u8> {
        let mut heaps = self.clone_heaps();
        let module_name = heaps.string(&self.module_name);
        let assembly_name = heaps.string(&self.assembly_name);
        let public_key = heaps.blob(&self.public_key);

        // code section: CLI header, then method bodies, then metadata
        let mut text = vec![0u8; CLI_HEADER_SIZE];
        let mut rvas = Vec::with_capacity(self.methods.len());
        for method in &self.methods {
            match &method.body {
                Some(il) => {
                    align(&mut text, 4);
                    rvas.push(SECTION_RVA + text.len() as u32);
                    if il.len() < 64 {
                        text.push(((il.len() as u8) << 2) | 0x2);
                    } else {
                        text.extend_from_slice(&0x3003u16.to_le_bytes());
                        text.extend_from_slice(&8u16.to_le_bytes());
                        text.extend_from_slice(&(il.len() as u32).to_le_bytes());
                        text.extend_from_slice(&0u32.to_le_bytes());
                    }
                    text.extend_from_slice(il);
                }
                None => rvas.push(0),
            }
        }
        align(&mut text, 4);

        let tables = self.table_rows(&rvas, module_name, assembly_name, public_key);
        let metadata_offset = text.len();
        let metadata = metadata_root(&heaps, &tables);
        text.extend_from_slice(&metadata);

        // CLI header
        let mut cli = Vec::with_capacity(CLI_HEADER_SIZE);
        cli.extend_from_slice(&(CLI_HEADER_SIZE as u32).to_le_bytes());
        cli.extend_from_slice(&2u16.to_le_bytes());
        cli.extend_from_slice(&5u16.to_le_bytes());
        cli.extend_from_slice(&(SECTION_RVA + metadata_offset as u32).to_le_bytes());
        cli.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
        cli.extend_from_slice(&self.cli_flags.to_le_bytes());
        cli.extend_from_slice(&self.entry_point.to_le_bytes());
        text[..cli.len()].copy_from_slice(&cli);

        let mut image = pe_headers(text.len() as u32);
        image.resize(SECTION_RAW, 0);
        image.extend_from_slice(&text);
        align(&mut image, 0x200);
        image
    }

    fn clone_heaps(&self) -> Heaps {
        Heaps {
            strings: self.strings.clone(),
            string_index: self.string_index.clone(),
            blobs: self.blobs.clone(),
            user_strings: self.user_strings.clone(),
        }
    }

    fn table_rows(
        &self,
        rvas: &[u32],
        module_name: u32,
        assembly_name: u32,
        public_key: u32,
    ) -> BTreeMap<TableId, Vec<Vec<u32>>> {
        let mut tables: BTreeMap<TableId, Vec<Vec<u32>>> = BTreeMap::new();

        tables.insert(TableId::Module, vec![vec![0, module_name, 1, 0, 0]]);
        tables.insert(
            TableId::TypeRef,
            self.type_refs.iter().map(|r| r.to_vec()).collect(),
        );

        let type_rows = self
            .types
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                let row = i as u32 + 1;
                let field_list = 1 + self.fields.iter().filter(|f| f.owner < row).count() as u32;
                let method_list = 1 + self.methods.iter().filter(|m| m.owner < row).count() as u32;
                vec![
                    ty.decl.flags,
                    self.string_index.get(&ty.decl.name).copied().unwrap_or(0),
                    self.string_index.get(&ty.decl.namespace).copied().unwrap_or(0),
                    ty.decl.extends.map(type_def_or_ref).unwrap_or(0),
                    field_list,
                    method_list,
                ]
            })
            .collect();
        tables.insert(TableId::TypeDef, type_rows);

        tables.insert(
            TableId::Field,
            self.fields
                .iter()
                .map(|f| vec![u32::from(f.flags), f.name, f.signature])
                .collect(),
        );
        tables.insert(
            TableId::MethodDef,
            self.methods
                .iter()
                .zip(rvas)
                .map(|(m, rva)| {
                    vec![*rva, 0, u32::from(m.flags), m.name, m.signature, m.first_param]
                })
                .collect(),
        );
        tables.insert(TableId::Param, self.params.iter().map(|r| r.to_vec()).collect());
        tables.insert(
            TableId::InterfaceImpl,
            self.interface_impls.iter().map(|r| r.to_vec()).collect(),
        );
        tables.insert(
            TableId::MemberRef,
            self.member_refs.iter().map(|r| r.to_vec()).collect(),
        );
        tables.insert(
            TableId::CustomAttribute,
            self.custom_attributes.iter().map(|r| r.to_vec()).collect(),
        );

        let mut property_map = Vec::new();
        for (i, property) in self.properties.iter().enumerate() {
            if property_map
                .last()
                .map_or(true, |entry: &Vec<u32>| entry[0] != property.owner)
            {
                property_map.push(vec![property.owner, i as u32 + 1]);
            }
        }
        tables.insert(TableId::PropertyMap, property_map);
        tables.insert(
            TableId::Property,
            self.properties
                .iter()
                .map(|p| vec![u32::from(p.flags), p.name, p.signature])
                .collect(),
        );
        tables.insert(
            TableId::MethodSemantics,
            self.method_semantics.iter().map(|r| r.to_vec()).collect(),
        );
        tables.insert(
            TableId::TypeSpec,
            self.type_specs.iter().map(|b| vec![*b]).collect(),
        );

        let key_flags = if self.public_key.is_empty() {
            0
        } else {
            ASSEMBLY_FLAG_PUBLIC_KEY
        };
        tables.insert(
            TableId::Assembly,
            vec![vec![
                0x8004,
                u32::from(self.version[0]),
                u32::from(self.version[1]),
                u32::from(self.version[2]),
                u32::from(self.version[3]),
                key_flags,
                public_key,
                assembly_name,
                0,
            ]],
        );
        tables.insert(
            TableId::AssemblyRef,
            self.assembly_refs.iter().map(|r| r.to_vec()).collect(),
        );
        tables.insert(
            TableId::NestedClass,
            self.nested.iter().map(|r| r.to_vec()).collect(),
        );

        tables.retain(|_, rows| !rows.is_empty());
        tables
    }
}

struct Heaps {
    strings: Vec<u8>,
    string_index: HashMap<String, u32>,
    blobs: Vec<u8>,
    user_strings: Vec<u8>,
}

impl Heaps {
    fn string(&mut self, value: &str) -> u32 {
        if let Some(index) = self.string_index.get(value) {
            return *index;
        }
        let index = self.strings.len() as u32;
        self.strings.extend_from_slice(value.as_bytes());
        self.strings.push(0);
        self.string_index.insert(value.to_string(), index);
        index
    }

    fn blob(&mut self, value: &[u8]) -> u32 {
        if value.is_empty() {
            return 0;
        }
        let index = self.blobs.len() as u32;
        self.blobs.extend(compress(value.len() as u32));
        self.blobs.extend_from_slice(value);
        index
    }
}

fn tables_stream(tables: &BTreeMap<TableId, Vec<Vec<u32>>>) -> Vec<u8> {
    let mut rows = [0u32; TABLE_COUNT];
    let mut valid = 0u64;
    for (table, table_rows) in tables {
        rows[table.index()] = table_rows.len() as u32;
        valid |= 1u64 << table.index();
    }

    let mut out = Vec::new();
    out.extend_from_slice(&0u32.to_le_bytes());
    out.push(2);
    out.push(0);
    out.push(0); // heap sizes: all narrow
    out.push(1);
    out.extend_from_slice(&valid.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    for table in tables.keys() {
        out.extend_from_slice(&rows[table.index()].to_le_bytes());
    }

    let layouts = compute_layouts(&rows, 0, out.len());
    for (table, table_rows) in tables {
        let layout = &layouts[table.index()];
        for (r, values) in table_rows.iter().enumerate() {
            let start = layout.offset + r * layout.row_size;
            if out.len() < start + layout.row_size {
                out.resize(start + layout.row_size, 0);
            }
            for (value, (cell_offset, width)) in values.iter().zip(&layout.cells) {
                let at = start + cell_offset;
                out[at..at + width].copy_from_slice(&value.to_le_bytes()[..*width]);
            }
        }
    }
    align(&mut out, 4);
    out
}

fn metadata_root(heaps: &Heaps, tables: &BTreeMap<TableId, Vec<Vec<u32>>>) -> Vec<u8> {
    let mut strings = heaps.strings.clone();
    align(&mut strings, 4);
    let mut blobs = heaps.blobs.clone();
    align(&mut blobs, 4);
    let mut user_strings = heaps.user_strings.clone();
    align(&mut user_strings, 4);
    let guids: Vec<u8> = (1..=16u8).collect();
    let tables = tables_stream(tables);

    let streams: [(&str, &[u8]); 5] = [
        ("#~", &tables),
        ("#Strings", &strings),
        ("#US", &user_strings),
        ("#GUID", &guids),
        ("#Blob", &blobs),
    ];

    let version = b"v4.0.30319\0\0";
    let mut header_len = 16 + version.len() + 4;
    for (name, _) in &streams {
        header_len += 8 + (name.len() + 1 + 3) / 4 * 4;
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"BSJB");
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(version.len() as u32).to_le_bytes());
    out.extend_from_slice(version);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(streams.len() as u16).to_le_bytes());

    let mut offset = header_len;
    for (name, content) in &streams {
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        out.extend_from_slice(&(content.len() as u32).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        align(&mut out, 4);
        offset += content.len();
    }
    for (_, content) in &streams {
        out.extend_from_slice(content);
    }
    out
}

fn pe_headers(text_size: u32) -> Vec<u8> {
    let mut out = vec![0u8; 0x80];
    out[0] = b'M';
    out[1] = b'Z';
    out[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());

    out.extend_from_slice(b"PE\0\0");
    // COFF header
    out.extend_from_slice(&0x014Cu16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&224u16.to_le_bytes());
    out.extend_from_slice(&0x2102u16.to_le_bytes());

    // PE32 optional header; only the fields the reader needs are populated
    let mut optional = vec![0u8; 224];
    optional[0..2].copy_from_slice(&0x010Bu16.to_le_bytes());
    optional[92..96].copy_from_slice(&16u32.to_le_bytes());
    let cli_dir = 96 + 14 * 8;
    optional[cli_dir..cli_dir + 4].copy_from_slice(&SECTION_RVA.to_le_bytes());
    optional[cli_dir + 4..cli_dir + 8].copy_from_slice(&(CLI_HEADER_SIZE as u32).to_le_bytes());
    out.extend_from_slice(&optional);

    let raw_size = (text_size + 0x1FF) & !0x1FF;
    let mut section = vec![0u8; 40];
    section[..5].copy_from_slice(b".text");
    section[8..12].copy_from_slice(&text_size.to_le_bytes());
    section[12..16].copy_from_slice(&SECTION_RVA.to_le_bytes());
    section[16..20].copy_from_slice(&raw_size.to_le_bytes());
    section[20..24].copy_from_slice(&(SECTION_RAW as u32).to_le_bytes());
    section[36..40].copy_from_slice(&0x6000_0020u32.to_le_bytes());
    out.extend_from_slice(&section);
    out
}

fn type_def_or_ref(token: u32) -> u32 {
    let (table, row) = split_token(token);
    let table = TableId::from_index(table).unwrap_or(TableId::TypeRef);
    CodedIndex::TypeDefOrRef.encode(table, row)
}

fn compress(value: u32) -> Vec<u8> {
    if value < 0x80 {
        vec![value as u8]
    } else if value < 0x4000 {
        (0x8000 | value as u16).to_be_bytes().to_vec()
    } else {
        (0xC000_0000 | value).to_be_bytes().to_vec()
    }
}

fn align(buf: &mut Vec<u8>, to: usize) {
    let len = (buf.len() + to - 1) / to * to;
    buf.resize(len, 0);
}
