//! PE/COFF container: just enough to locate the CLI header and map RVAs.

use super::bytes::{slice, u16_at, u32_at};
use crate::error::{MetadataError, Result};

const DOS_MAGIC: u16 = 0x5A4D; // "MZ"
const PE_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
const PE32_MAGIC: u16 = 0x10B;
const PE32_PLUS_MAGIC: u16 = 0x20B;
const CLI_DIRECTORY_INDEX: usize = 14;
const SECTION_HEADER_SIZE: usize = 40;

#[derive(Debug, Clone)]
pub(crate) struct Section {
    pub name: String,
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub raw_size: u32,
    pub raw_pointer: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct PeImage {
    pub machine: u16,
    pub is_pe32_plus: bool,
    pub sections: Vec<Section>,
    pub cli_rva: u32,
    pub cli_size: u32,
}

/// ECMA-335 II.25.3.3 CLI header
#[derive(Debug, Clone, Copy)]
pub(crate) struct CliHeader {
    pub runtime_major: u16,
    pub runtime_minor: u16,
    pub metadata_rva: u32,
    pub metadata_size: u32,
    pub flags: u32,
    pub entry_point_token: u32,
}

impl PeImage {
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        if u16_at(data, 0, "DOS header").ok() != Some(DOS_MAGIC) {
            return Err(MetadataError::invalid("missing MZ signature"));
        }
        let pe_offset = u32_at(data, 0x3C, "e_lfanew")? as usize;
        if u32_at(data, pe_offset, "PE signature").ok() != Some(PE_SIGNATURE) {
            return Err(MetadataError::invalid("missing PE signature"));
        }

        let coff = pe_offset + 4;
        let machine = u16_at(data, coff, "COFF machine")?;
        let section_count = u16_at(data, coff + 2, "COFF section count")? as usize;
        let optional_size = u16_at(data, coff + 16, "COFF optional header size")? as usize;

        let optional = coff + 20;
        let magic = u16_at(data, optional, "optional header magic")?;
        let (is_pe32_plus, dir_count_offset, dirs_offset) = match magic {
            PE32_MAGIC => (false, 92, 96),
            PE32_PLUS_MAGIC => (true, 108, 112),
            other => {
                return Err(MetadataError::invalid(format!(
                    "unknown optional header magic {:#06x}",
                    other
                )))
            }
        };

        let dir_count = u32_at(data, optional + dir_count_offset, "data directory count")? as usize;
        if dir_count <= CLI_DIRECTORY_INDEX {
            return Err(MetadataError::invalid("no CLI header data directory"));
        }
        let cli_dir = optional + dirs_offset + CLI_DIRECTORY_INDEX * 8;
        let cli_rva = u32_at(data, cli_dir, "CLI directory")?;
        let cli_size = u32_at(data, cli_dir + 4, "CLI directory")?;
        if cli_rva == 0 || cli_size == 0 {
            return Err(MetadataError::invalid("CLI header directory is empty"));
        }

        let table = optional + optional_size;
        let mut sections = Vec::with_capacity(section_count);
        for i in 0..section_count {
            let base = table + i * SECTION_HEADER_SIZE;
            let raw_name = slice(data, base, 8, "section name")?;
            let name_len = raw_name.iter().position(|b| *b == 0).unwrap_or(8);
            sections.push(Section {
                name: String::from_utf8_lossy(&raw_name[..name_len]).into_owned(),
                virtual_size: u32_at(data, base + 8, "section header")?,
                virtual_address: u32_at(data, base + 12, "section header")?,
                raw_size: u32_at(data, base + 16, "section header")?,
                raw_pointer: u32_at(data, base + 20, "section header")?,
            });
        }

        Ok(Self {
            machine,
            is_pe32_plus,
            sections,
            cli_rva,
            cli_size,
        })
    }

    pub(crate) fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        self.sections.iter().find_map(|s| {
            let extent = s.virtual_size.max(s.raw_size);
            if rva >= s.virtual_address && rva - s.virtual_address < extent {
                Some((rva - s.virtual_address + s.raw_pointer) as usize)
            } else {
                None
            }
        })
    }

    pub(crate) fn cli_header(&self, data: &[u8]) -> Result<CliHeader> {
        let offset = self
            .rva_to_offset(self.cli_rva)
            .ok_or_else(|| MetadataError::invalid("CLI header RVA is outside every section"))?;
        let cb = u32_at(data, offset, "CLI header")?;
        if cb < 72 {
            return Err(MetadataError::invalid(format!("CLI header too small ({} bytes)", cb)));
        }
        Ok(CliHeader {
            runtime_major: u16_at(data, offset + 4, "CLI header")?,
            runtime_minor: u16_at(data, offset + 6, "CLI header")?,
            metadata_rva: u32_at(data, offset + 8, "CLI header")?,
            metadata_size: u32_at(data, offset + 12, "CLI header")?,
            flags: u32_at(data, offset + 16, "CLI header")?,
            entry_point_token: u32_at(data, offset + 20, "CLI header")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_pe() {
        let err = PeImage::parse(b"not a module at all, just text").unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_rva_mapping_uses_section_table() {
        let image = PeImage {
            machine: 0x14c,
            is_pe32_plus: false,
            sections: vec![Section {
                name: ".text".into(),
                virtual_address: 0x2000,
                virtual_size: 0x100,
                raw_size: 0x200,
                raw_pointer: 0x200,
            }],
            cli_rva: 0x2000,
            cli_size: 72,
        };
        assert_eq!(image.rva_to_offset(0x2000), Some(0x200));
        assert_eq!(image.rva_to_offset(0x2010), Some(0x210));
        assert_eq!(image.rva_to_offset(0x1FFF), None);
        assert_eq!(image.rva_to_offset(0x2200), None);
    }
}
