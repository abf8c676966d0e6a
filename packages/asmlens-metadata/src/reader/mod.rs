//! Lightweight ECMA-335 metadata reader.
//!
//! The module image is read into memory once and the file handle is dropped
//! immediately, so any number of readers can open the same file and the
//! upload directory can be deleted while analyzers still hold a reader.

mod bytes;
mod entities;
mod heaps;
mod identity;
mod names;
mod pe;
pub mod signature;
pub mod tables;

use std::path::{Path, PathBuf};

use bytes::{slice, u16_at, u32_at, u8_at};
use heaps::Heap;
use pe::{CliHeader, PeImage};
use tables::{TableId, TablesStream};

use crate::error::{MetadataError, Result};

pub use entities::MethodBody;
pub use identity::public_key_token;

pub(crate) use bytes::BlobCursor;

const METADATA_SIGNATURE: u32 = 0x424A_5342; // "BSJB"

pub const COMIMAGE_FLAGS_ILONLY: u32 = 0x0000_0001;
pub const COMIMAGE_FLAGS_32BITREQUIRED: u32 = 0x0000_0002;
pub const COMIMAGE_FLAGS_32BITPREFERRED: u32 = 0x0002_0000;

/// An opened managed module.
pub struct ModuleReader {
    path: Option<PathBuf>,
    data: Vec<u8>,
    pe: PeImage,
    cli: CliHeader,
    runtime_version: String,
    strings: Heap,
    blobs: Heap,
    guids: Heap,
    user_strings: Heap,
    tables: TablesStream,
}

impl std::fmt::Debug for ModuleReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleReader")
            .field("path", &self.path)
            .field("size", &self.data.len())
            .field("runtime_version", &self.runtime_version)
            .finish()
    }
}

impl ModuleReader {
    /// Opens a module from disk. The file is read fully and closed before parsing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = Self::from_bytes(data)?;
        reader.path = Some(path.to_path_buf());
        Ok(reader)
    }

    /// Parses an in-memory image; used to validate uploads before anything is persisted.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let pe = PeImage::parse(&data)?;
        let cli = pe.cli_header(&data)?;

        let root = pe
            .rva_to_offset(cli.metadata_rva)
            .ok_or_else(|| MetadataError::invalid("metadata RVA is outside every section"))?;
        if u32_at(&data, root, "metadata root").ok() != Some(METADATA_SIGNATURE) {
            return Err(MetadataError::invalid("missing BSJB metadata signature"));
        }

        let version_len = u32_at(&data, root + 12, "metadata version length")? as usize;
        let raw_version = slice(&data, root + 16, version_len, "metadata version")?;
        let nul = raw_version.iter().position(|b| *b == 0).unwrap_or(version_len);
        let runtime_version = String::from_utf8_lossy(&raw_version[..nul]).into_owned();

        let streams_at = root + 16 + version_len;
        let stream_count = u16_at(&data, streams_at + 2, "stream count")? as usize;

        let mut strings = Heap::default();
        let mut blobs = Heap::default();
        let mut guids = Heap::default();
        let mut user_strings = Heap::default();
        let mut tables_heap = None;

        let mut cursor = streams_at + 4;
        for _ in 0..stream_count {
            let offset = u32_at(&data, cursor, "stream header")? as usize;
            let size = u32_at(&data, cursor + 4, "stream header")? as usize;
            let mut name = Vec::new();
            let mut at = cursor + 8;
            loop {
                let b = u8_at(&data, at, "stream name")?;
                at += 1;
                if b == 0 {
                    break;
                }
                name.push(b);
                if name.len() > 32 {
                    return Err(MetadataError::invalid("unterminated stream name"));
                }
            }
            // names are padded to a 4-byte boundary, counting the NUL
            cursor = cursor + 8 + (name.len() + 1 + 3) / 4 * 4;

            let heap = Heap {
                offset: root + offset,
                size,
            };
            slice(&data, heap.offset, heap.size, "metadata stream")?;
            match name.as_slice() {
                b"#~" | b"#-" => tables_heap = Some(heap),
                b"#Strings" => strings = heap,
                b"#Blob" => blobs = heap,
                b"#GUID" => guids = heap,
                b"#US" => user_strings = heap,
                _ => {}
            }
        }

        let tables_heap =
            tables_heap.ok_or_else(|| MetadataError::invalid("missing #~ tables stream"))?;
        let tables = TablesStream::parse(&data, tables_heap.offset, tables_heap.size)?;
        if tables.rows(TableId::Module) == 0 {
            return Err(MetadataError::invalid("Module table is empty"));
        }

        Ok(Self {
            path: None,
            data,
            pe,
            cli,
            runtime_version,
            strings,
            blobs,
            guids,
            user_strings,
            tables,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn file_size(&self) -> usize {
        self.data.len()
    }

    /// The raw image this reader was parsed from.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Runtime version string from the metadata root, e.g. `v4.0.30319`
    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    pub fn cli_runtime_version(&self) -> (u16, u16) {
        (self.cli.runtime_major, self.cli.runtime_minor)
    }

    pub fn cli_flags(&self) -> u32 {
        self.cli.flags
    }

    /// Entry point token, `None` for libraries
    pub fn entry_point_token(&self) -> Option<u32> {
        match self.cli.entry_point_token {
            0 => None,
            token => Some(token),
        }
    }

    pub fn machine(&self) -> u16 {
        self.pe.machine
    }

    pub fn is_pe32_plus(&self) -> bool {
        self.pe.is_pe32_plus
    }

    pub fn row_count(&self, table: TableId) -> u32 {
        self.tables.rows(table)
    }

    pub(crate) fn cell(&self, table: TableId, row: u32, col: usize) -> Result<u32> {
        self.tables.cell(&self.data, table, row, col)
    }

    pub(crate) fn string(&self, index: u32) -> Result<String> {
        self.strings.string(&self.data, index)
    }

    pub(crate) fn blob(&self, index: u32) -> Result<&[u8]> {
        self.blobs.blob(&self.data, index)
    }

    pub(crate) fn guid(&self, index: u32) -> Result<Option<[u8; 16]>> {
        self.guids.guid(&self.data, index)
    }

    /// Literal from the `#US` heap (the low 24 bits of an `ldstr` token)
    pub fn user_string(&self, index: u32) -> Result<String> {
        self.user_strings.user_string(&self.data, index)
    }

    pub fn module_name(&self) -> Result<String> {
        self.string(self.cell(TableId::Module, 1, 1)?)
    }

    pub fn module_mvid(&self) -> Result<Option<String>> {
        let index = self.cell(TableId::Module, 1, 2)?;
        Ok(self.guid(index)?.map(|raw| heaps::format_guid(&raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ModuleBuilder;

    #[test]
    fn test_reads_module_header_fields() {
        let bytes = ModuleBuilder::new("Sample").build();
        let reader = ModuleReader::from_bytes(bytes).unwrap();

        assert_eq!(reader.module_name().unwrap(), "Sample.dll");
        assert_eq!(reader.runtime_version(), "v4.0.30319");
        assert_eq!(reader.cli_runtime_version(), (2, 5));
        assert_eq!(reader.cli_flags() & COMIMAGE_FLAGS_ILONLY, COMIMAGE_FLAGS_ILONLY);
        assert_eq!(reader.entry_point_token(), None);
        assert!(reader.module_mvid().unwrap().is_some());
        // <Module> is always present
        assert_eq!(reader.row_count(TableId::TypeDef), 1);
    }

    #[test]
    fn test_corrupted_metadata_signature_is_invalid_module() {
        let mut bytes = ModuleBuilder::new("Broken").build();
        let at = bytes
            .windows(4)
            .position(|w| w == b"BSJB")
            .expect("builder writes a metadata root");
        bytes[at..at + 4].copy_from_slice(b"XXXX");

        let err = ModuleReader::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, MetadataError::InvalidModule(_)));
    }

    #[test]
    fn test_plain_text_is_invalid_module() {
        let err = ModuleReader::from_bytes(b"hello world".to_vec()).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_open_reports_missing_file() {
        let err = ModuleReader::open("/definitely/not/here.dll").unwrap_err();
        assert!(matches!(err, MetadataError::Io { .. }));
    }

    #[test]
    fn test_open_releases_file_for_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("module.dll");
        std::fs::write(&path, ModuleBuilder::new("Sample").build()).unwrap();

        let reader = ModuleReader::open(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(reader.module_name().unwrap(), "Sample.dll");
        assert_eq!(reader.path(), Some(path.as_path()));
    }
}
