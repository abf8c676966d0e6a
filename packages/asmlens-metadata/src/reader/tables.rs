//! ECMA-335 II.22 table schema and row layout.
//!
//! Row widths depend on the row counts of other tables (simple and coded
//! indexes) and on the heap-size flags, so every table present in the
//! stream has to be sized even when the analyzers never read it.

use super::bytes::{u32_at, u64_at, u8_at, uint_at};
use crate::error::{MetadataError, Result};

pub(crate) const TABLE_COUNT: usize = 0x2D;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TableId {
    Module = 0x00,
    TypeRef = 0x01,
    TypeDef = 0x02,
    FieldPtr = 0x03,
    Field = 0x04,
    MethodPtr = 0x05,
    MethodDef = 0x06,
    ParamPtr = 0x07,
    Param = 0x08,
    InterfaceImpl = 0x09,
    MemberRef = 0x0A,
    Constant = 0x0B,
    CustomAttribute = 0x0C,
    FieldMarshal = 0x0D,
    DeclSecurity = 0x0E,
    ClassLayout = 0x0F,
    FieldLayout = 0x10,
    StandAloneSig = 0x11,
    EventMap = 0x12,
    EventPtr = 0x13,
    Event = 0x14,
    PropertyMap = 0x15,
    PropertyPtr = 0x16,
    Property = 0x17,
    MethodSemantics = 0x18,
    MethodImpl = 0x19,
    ModuleRef = 0x1A,
    TypeSpec = 0x1B,
    ImplMap = 0x1C,
    FieldRva = 0x1D,
    EncLog = 0x1E,
    EncMap = 0x1F,
    Assembly = 0x20,
    AssemblyProcessor = 0x21,
    AssemblyOs = 0x22,
    AssemblyRef = 0x23,
    AssemblyRefProcessor = 0x24,
    AssemblyRefOs = 0x25,
    File = 0x26,
    ExportedType = 0x27,
    ManifestResource = 0x28,
    NestedClass = 0x29,
    GenericParam = 0x2A,
    MethodSpec = 0x2B,
    GenericParamConstraint = 0x2C,
}

impl TableId {
    pub const ALL: [TableId; TABLE_COUNT] = [
        TableId::Module,
        TableId::TypeRef,
        TableId::TypeDef,
        TableId::FieldPtr,
        TableId::Field,
        TableId::MethodPtr,
        TableId::MethodDef,
        TableId::ParamPtr,
        TableId::Param,
        TableId::InterfaceImpl,
        TableId::MemberRef,
        TableId::Constant,
        TableId::CustomAttribute,
        TableId::FieldMarshal,
        TableId::DeclSecurity,
        TableId::ClassLayout,
        TableId::FieldLayout,
        TableId::StandAloneSig,
        TableId::EventMap,
        TableId::EventPtr,
        TableId::Event,
        TableId::PropertyMap,
        TableId::PropertyPtr,
        TableId::Property,
        TableId::MethodSemantics,
        TableId::MethodImpl,
        TableId::ModuleRef,
        TableId::TypeSpec,
        TableId::ImplMap,
        TableId::FieldRva,
        TableId::EncLog,
        TableId::EncMap,
        TableId::Assembly,
        TableId::AssemblyProcessor,
        TableId::AssemblyOs,
        TableId::AssemblyRef,
        TableId::AssemblyRefProcessor,
        TableId::AssemblyRefOs,
        TableId::File,
        TableId::ExportedType,
        TableId::ManifestResource,
        TableId::NestedClass,
        TableId::GenericParam,
        TableId::MethodSpec,
        TableId::GenericParamConstraint,
    ];

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn token(self, row: u32) -> u32 {
        ((self as u32) << 24) | (row & 0x00FF_FFFF)
    }

    pub fn name(self) -> &'static str {
        match self {
            TableId::Module => "Module",
            TableId::TypeRef => "TypeRef",
            TableId::TypeDef => "TypeDef",
            TableId::Field => "Field",
            TableId::MethodDef => "MethodDef",
            TableId::Param => "Param",
            TableId::InterfaceImpl => "InterfaceImpl",
            TableId::MemberRef => "MemberRef",
            TableId::CustomAttribute => "CustomAttribute",
            TableId::StandAloneSig => "StandAloneSig",
            TableId::PropertyMap => "PropertyMap",
            TableId::Property => "Property",
            TableId::MethodSemantics => "MethodSemantics",
            TableId::ModuleRef => "ModuleRef",
            TableId::TypeSpec => "TypeSpec",
            TableId::Assembly => "Assembly",
            TableId::AssemblyRef => "AssemblyRef",
            TableId::NestedClass => "NestedClass",
            TableId::MethodSpec => "MethodSpec",
            _ => "metadata table",
        }
    }
}

/// Splits a metadata token into its table and 1-based row.
pub fn split_token(token: u32) -> (u8, u32) {
    ((token >> 24) as u8, token & 0x00FF_FFFF)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CodedIndex {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl CodedIndex {
    fn tag_bits(self) -> u32 {
        match self {
            CodedIndex::HasCustomAttribute => 5,
            CodedIndex::MemberRefParent | CodedIndex::CustomAttributeType => 3,
            CodedIndex::TypeDefOrRef
            | CodedIndex::HasConstant
            | CodedIndex::HasDeclSecurity
            | CodedIndex::Implementation
            | CodedIndex::ResolutionScope => 2,
            CodedIndex::HasFieldMarshal
            | CodedIndex::HasSemantics
            | CodedIndex::MethodDefOrRef
            | CodedIndex::MemberForwarded
            | CodedIndex::TypeOrMethodDef => 1,
        }
    }

    /// Target tables in tag order; `None` marks tags reserved by the standard.
    fn targets(self) -> &'static [Option<TableId>] {
        use TableId::*;
        match self {
            CodedIndex::TypeDefOrRef => &[Some(TypeDef), Some(TypeRef), Some(TypeSpec)],
            CodedIndex::HasConstant => &[Some(Field), Some(Param), Some(Property)],
            CodedIndex::HasCustomAttribute => &[
                Some(MethodDef),
                Some(Field),
                Some(TypeRef),
                Some(TypeDef),
                Some(Param),
                Some(InterfaceImpl),
                Some(MemberRef),
                Some(Module),
                Some(DeclSecurity),
                Some(Property),
                Some(Event),
                Some(StandAloneSig),
                Some(ModuleRef),
                Some(TypeSpec),
                Some(Assembly),
                Some(AssemblyRef),
                Some(File),
                Some(ExportedType),
                Some(ManifestResource),
                Some(GenericParam),
                Some(GenericParamConstraint),
                Some(MethodSpec),
            ],
            CodedIndex::HasFieldMarshal => &[Some(Field), Some(Param)],
            CodedIndex::HasDeclSecurity => &[Some(TypeDef), Some(MethodDef), Some(Assembly)],
            CodedIndex::MemberRefParent => &[
                Some(TypeDef),
                Some(TypeRef),
                Some(ModuleRef),
                Some(MethodDef),
                Some(TypeSpec),
            ],
            CodedIndex::HasSemantics => &[Some(Event), Some(Property)],
            CodedIndex::MethodDefOrRef => &[Some(MethodDef), Some(MemberRef)],
            CodedIndex::MemberForwarded => &[Some(Field), Some(MethodDef)],
            CodedIndex::Implementation => &[Some(File), Some(AssemblyRef), Some(ExportedType)],
            CodedIndex::CustomAttributeType => {
                &[None, None, Some(MethodDef), Some(MemberRef), None]
            }
            CodedIndex::ResolutionScope => {
                &[Some(Module), Some(ModuleRef), Some(AssemblyRef), Some(TypeRef)]
            }
            CodedIndex::TypeOrMethodDef => &[Some(TypeDef), Some(MethodDef)],
        }
    }

    /// Decodes a raw coded index into `(table, row)`; row 0 means null.
    pub(crate) fn decode(self, raw: u32) -> Option<(TableId, u32)> {
        let bits = self.tag_bits();
        let tag = (raw & ((1 << bits) - 1)) as usize;
        let row = raw >> bits;
        let table = self.targets().get(tag).copied().flatten()?;
        if row == 0 {
            None
        } else {
            Some((table, row))
        }
    }

    /// Encodes `(table, row)` into a coded index value.
    pub(crate) fn encode(self, table: TableId, row: u32) -> u32 {
        let tag = self
            .targets()
            .iter()
            .position(|t| *t == Some(table))
            .unwrap_or(0) as u32;
        (row << self.tag_bits()) | tag
    }

    fn width(self, rows: &[u32; TABLE_COUNT]) -> usize {
        let max_rows = self
            .targets()
            .iter()
            .flatten()
            .map(|t| rows[t.index()])
            .max()
            .unwrap_or(0);
        if max_rows < (1u32 << (16 - self.tag_bits())) {
            2
        } else {
            4
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Column {
    U16,
    U32,
    Str,
    Guid,
    Blob,
    Index(TableId),
    Coded(CodedIndex),
}

pub(crate) fn columns(table: TableId) -> &'static [Column] {
    use CodedIndex as C;
    use Column::*;
    use TableId as T;
    match table {
        T::Module => &[U16, Str, Guid, Guid, Guid],
        T::TypeRef => &[Coded(C::ResolutionScope), Str, Str],
        T::TypeDef => &[
            U32,
            Str,
            Str,
            Coded(C::TypeDefOrRef),
            Index(T::Field),
            Index(T::MethodDef),
        ],
        T::FieldPtr => &[Index(T::Field)],
        T::Field => &[U16, Str, Blob],
        T::MethodPtr => &[Index(T::MethodDef)],
        T::MethodDef => &[U32, U16, U16, Str, Blob, Index(T::Param)],
        T::ParamPtr => &[Index(T::Param)],
        T::Param => &[U16, U16, Str],
        T::InterfaceImpl => &[Index(T::TypeDef), Coded(C::TypeDefOrRef)],
        T::MemberRef => &[Coded(C::MemberRefParent), Str, Blob],
        T::Constant => &[U16, Coded(C::HasConstant), Blob],
        T::CustomAttribute => &[
            Coded(C::HasCustomAttribute),
            Coded(C::CustomAttributeType),
            Blob,
        ],
        T::FieldMarshal => &[Coded(C::HasFieldMarshal), Blob],
        T::DeclSecurity => &[U16, Coded(C::HasDeclSecurity), Blob],
        T::ClassLayout => &[U16, U32, Index(T::TypeDef)],
        T::FieldLayout => &[U32, Index(T::Field)],
        T::StandAloneSig => &[Blob],
        T::EventMap => &[Index(T::TypeDef), Index(T::Event)],
        T::EventPtr => &[Index(T::Event)],
        T::Event => &[U16, Str, Coded(C::TypeDefOrRef)],
        T::PropertyMap => &[Index(T::TypeDef), Index(T::Property)],
        T::PropertyPtr => &[Index(T::Property)],
        T::Property => &[U16, Str, Blob],
        T::MethodSemantics => &[U16, Index(T::MethodDef), Coded(C::HasSemantics)],
        T::MethodImpl => &[
            Index(T::TypeDef),
            Coded(C::MethodDefOrRef),
            Coded(C::MethodDefOrRef),
        ],
        T::ModuleRef => &[Str],
        T::TypeSpec => &[Blob],
        T::ImplMap => &[U16, Coded(C::MemberForwarded), Str, Index(T::ModuleRef)],
        T::FieldRva => &[U32, Index(T::Field)],
        T::EncLog => &[U32, U32],
        T::EncMap => &[U32],
        T::Assembly => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
        T::AssemblyProcessor => &[U32],
        T::AssemblyOs => &[U32, U32, U32],
        T::AssemblyRef => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
        T::AssemblyRefProcessor => &[U32, Index(T::AssemblyRef)],
        T::AssemblyRefOs => &[U32, U32, U32, Index(T::AssemblyRef)],
        T::File => &[U32, Str, Blob],
        T::ExportedType => &[U32, U32, Str, Str, Coded(C::Implementation)],
        T::ManifestResource => &[U32, U32, Str, Coded(C::Implementation)],
        T::NestedClass => &[Index(T::TypeDef), Index(T::TypeDef)],
        T::GenericParam => &[U16, U16, Coded(C::TypeOrMethodDef), Str],
        T::MethodSpec => &[Coded(C::MethodDefOrRef), Blob],
        T::GenericParamConstraint => &[Index(T::GenericParam), Coded(C::TypeDefOrRef)],
    }
}

pub(crate) const HEAP_STRINGS_WIDE: u8 = 0x01;
pub(crate) const HEAP_GUID_WIDE: u8 = 0x02;
pub(crate) const HEAP_BLOB_WIDE: u8 = 0x04;
const HEAP_EXTRA_DATA: u8 = 0x40;

#[derive(Debug, Clone, Default)]
pub(crate) struct TableLayout {
    pub rows: u32,
    pub row_size: usize,
    /// Absolute offset of the first row in the module image
    pub offset: usize,
    /// (offset within row, width) per column
    pub cells: Vec<(usize, usize)>,
}

/// Computes per-table row layouts from row counts and heap-size flags.
/// `base` is the absolute offset where the first table's rows begin.
pub(crate) fn compute_layouts(
    rows: &[u32; TABLE_COUNT],
    heap_sizes: u8,
    base: usize,
) -> Vec<TableLayout> {
    let str_width = if heap_sizes & HEAP_STRINGS_WIDE != 0 { 4 } else { 2 };
    let guid_width = if heap_sizes & HEAP_GUID_WIDE != 0 { 4 } else { 2 };
    let blob_width = if heap_sizes & HEAP_BLOB_WIDE != 0 { 4 } else { 2 };

    let mut offset = base;
    TableId::ALL
        .iter()
        .map(|table| {
            let mut cells = Vec::new();
            let mut row_size = 0;
            for column in columns(*table) {
                let width = match column {
                    Column::U16 => 2,
                    Column::U32 => 4,
                    Column::Str => str_width,
                    Column::Guid => guid_width,
                    Column::Blob => blob_width,
                    Column::Index(target) => {
                        if rows[target.index()] < 0x1_0000 {
                            2
                        } else {
                            4
                        }
                    }
                    Column::Coded(coded) => coded.width(rows),
                };
                cells.push((row_size, width));
                row_size += width;
            }
            let layout = TableLayout {
                rows: rows[table.index()],
                row_size,
                offset,
                cells,
            };
            offset += row_size * rows[table.index()] as usize;
            layout
        })
        .collect()
}

/// The parsed `#~` (or `#-`) stream header plus computed layouts.
#[derive(Debug, Clone)]
pub(crate) struct TablesStream {
    pub heap_sizes: u8,
    pub layouts: Vec<TableLayout>,
}

impl TablesStream {
    pub(crate) fn parse(data: &[u8], offset: usize, size: usize) -> Result<Self> {
        let heap_sizes = u8_at(data, offset + 6, "tables header")?;
        let valid = u64_at(data, offset + 8, "tables valid mask")?;

        let mut rows = [0u32; TABLE_COUNT];
        let mut cursor = offset + 24;
        for bit in 0..64u8 {
            if valid & (1u64 << bit) == 0 {
                continue;
            }
            let count = u32_at(data, cursor, "table row count")?;
            cursor += 4;
            match TableId::from_index(bit) {
                Some(table) => rows[table.index()] = count,
                None => {
                    return Err(MetadataError::invalid(format!(
                        "unsupported metadata table {:#04x}",
                        bit
                    )))
                }
            }
        }
        if heap_sizes & HEAP_EXTRA_DATA != 0 {
            cursor += 4;
        }

        let layouts = compute_layouts(&rows, heap_sizes, cursor);
        let end = layouts
            .last()
            .map(|l| l.offset + l.row_size * l.rows as usize)
            .unwrap_or(cursor);
        if end > offset + size || end > data.len() {
            return Err(MetadataError::truncated("metadata tables", cursor));
        }

        Ok(Self {
            heap_sizes,
            layouts,
        })
    }

    pub(crate) fn rows(&self, table: TableId) -> u32 {
        self.layouts[table.index()].rows
    }

    /// Reads column `col` of 1-based `row`.
    pub(crate) fn cell(&self, data: &[u8], table: TableId, row: u32, col: usize) -> Result<u32> {
        let layout = &self.layouts[table.index()];
        if row == 0 || row > layout.rows {
            return Err(MetadataError::BadIndex {
                table: table.name(),
                row,
                rows: layout.rows,
            });
        }
        let (cell_offset, width) = layout.cells[col];
        let offset = layout.offset + (row as usize - 1) * layout.row_size + cell_offset;
        uint_at(data, offset, width, "table cell")
    }

    /// Resolves a list-start column through the optional `*Ptr` indirection table.
    pub(crate) fn indirect(
        &self,
        data: &[u8],
        ptr: TableId,
        row: u32,
    ) -> Result<u32> {
        if self.rows(ptr) == 0 {
            Ok(row)
        } else {
            self.cell(data, ptr, row, 0)
        }
    }

    /// Returns the `[start, end)` row range owned by `row` in a list column
    /// (e.g. TypeDef.MethodList), clamped to the target table.
    pub(crate) fn list_range(
        &self,
        data: &[u8],
        owner: TableId,
        row: u32,
        col: usize,
        target: TableId,
    ) -> Result<std::ops::Range<u32>> {
        let target_rows = self.rows(target);
        let start = self.cell(data, owner, row, col)?;
        let end = if row < self.rows(owner) {
            self.cell(data, owner, row + 1, col)?
        } else {
            target_rows + 1
        };
        let start = start.clamp(1, target_rows + 1);
        let end = end.clamp(start, target_rows + 1);
        Ok(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_ids_are_dense() {
        for (i, table) in TableId::ALL.iter().enumerate() {
            assert_eq!(table.index(), i);
            assert_eq!(TableId::from_index(i as u8), Some(*table));
        }
        assert_eq!(TableId::from_index(0x2D), None);
    }

    #[test]
    fn test_coded_index_roundtrip() {
        let raw = CodedIndex::TypeDefOrRef.encode(TableId::TypeRef, 7);
        assert_eq!(raw, (7 << 2) | 1);
        assert_eq!(
            CodedIndex::TypeDefOrRef.decode(raw),
            Some((TableId::TypeRef, 7))
        );
        // CustomAttributeType uses tags 2 and 3 only
        let ctor = CodedIndex::CustomAttributeType.encode(TableId::MemberRef, 3);
        assert_eq!(ctor, (3 << 3) | 3);
        assert_eq!(CodedIndex::CustomAttributeType.decode(1 << 3), None);
    }

    #[test]
    fn test_null_coded_index_decodes_to_none() {
        assert_eq!(CodedIndex::TypeDefOrRef.decode(0), None);
    }

    #[test]
    fn test_coded_index_widens_with_row_count() {
        let mut rows = [0u32; TABLE_COUNT];
        rows[TableId::TypeRef.index()] = (1 << 14) - 1;
        assert_eq!(CodedIndex::TypeDefOrRef.width(&rows), 2);
        rows[TableId::TypeRef.index()] = 1 << 14;
        assert_eq!(CodedIndex::TypeDefOrRef.width(&rows), 4);
    }

    #[test]
    fn test_layout_row_sizes_for_small_module() {
        let mut rows = [0u32; TABLE_COUNT];
        rows[TableId::Module.index()] = 1;
        rows[TableId::TypeDef.index()] = 2;
        let layouts = compute_layouts(&rows, 0, 100);
        // Generation + Name + 3 GUIDs, all 2 bytes wide
        assert_eq!(layouts[TableId::Module.index()].row_size, 10);
        // Flags(4) + Name + Namespace + Extends + FieldList + MethodList
        assert_eq!(layouts[TableId::TypeDef.index()].row_size, 14);
        assert_eq!(layouts[TableId::TypeRef.index()].offset, 110);
        assert_eq!(layouts[TableId::TypeDef.index()].offset, 110);
        assert_eq!(layouts[TableId::FieldPtr.index()].offset, 138);
    }

    #[test]
    fn test_wide_heaps_change_string_columns() {
        let mut rows = [0u32; TABLE_COUNT];
        rows[TableId::Module.index()] = 1;
        let layouts = compute_layouts(&rows, HEAP_STRINGS_WIDE | HEAP_GUID_WIDE, 0);
        assert_eq!(layouts[TableId::Module.index()].row_size, 2 + 4 + 4 * 3);
    }
}
