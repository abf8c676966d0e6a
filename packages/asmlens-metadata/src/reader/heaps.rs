//! Metadata heaps: `#Strings`, `#Blob`, `#GUID` and `#US`.

use super::bytes::{compressed_u32, slice};
use crate::error::{MetadataError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Heap {
    pub offset: usize,
    pub size: usize,
}

impl Heap {
    fn bytes<'a>(&self, data: &'a [u8]) -> Result<&'a [u8]> {
        slice(data, self.offset, self.size, "heap")
    }

    /// `#Strings`: NUL-terminated UTF-8 at a byte offset
    pub(crate) fn string(&self, data: &[u8], index: u32) -> Result<String> {
        let heap = self.bytes(data)?;
        let start = index as usize;
        if start >= heap.len() {
            if index == 0 {
                return Ok(String::new());
            }
            return Err(MetadataError::truncated("#Strings entry", self.offset + start));
        }
        let len = heap[start..]
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(heap.len() - start);
        Ok(String::from_utf8_lossy(&heap[start..start + len]).into_owned())
    }

    /// `#Blob`: compressed length prefix followed by the payload
    pub(crate) fn blob<'a>(&self, data: &'a [u8], index: u32) -> Result<&'a [u8]> {
        let heap = self.bytes(data)?;
        let start = index as usize;
        if start >= heap.len() {
            if index == 0 {
                return Ok(&[]);
            }
            return Err(MetadataError::truncated("#Blob entry", self.offset + start));
        }
        let (len, used) = compressed_u32(&heap[start..])?;
        let begin = start + used;
        heap.get(begin..begin + len as usize)
            .ok_or_else(|| MetadataError::truncated("#Blob payload", self.offset + begin))
    }

    /// `#GUID`: 1-based index of 16-byte entries
    pub(crate) fn guid(&self, data: &[u8], index: u32) -> Result<Option<[u8; 16]>> {
        if index == 0 {
            return Ok(None);
        }
        let heap = self.bytes(data)?;
        let start = (index as usize - 1) * 16;
        let raw = heap
            .get(start..start + 16)
            .ok_or_else(|| MetadataError::truncated("#GUID entry", self.offset + start))?;
        let mut out = [0u8; 16];
        out.copy_from_slice(raw);
        Ok(Some(out))
    }

    /// `#US`: blob-framed UTF-16LE with a trailing flag byte
    pub(crate) fn user_string(&self, data: &[u8], index: u32) -> Result<String> {
        let raw = self.blob(data, index)?;
        let chars = raw.len() / 2;
        let units: Vec<u16> = (0..chars)
            .map(|i| u16::from_le_bytes([raw[2 * i], raw[2 * i + 1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }
}

/// Formats a GUID heap entry in the registry form (mixed-endian fields).
pub(crate) fn format_guid(raw: &[u8; 16]) -> String {
    format!(
        "{:08x}-{:04x}-{:04x}-{}-{}",
        u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
        u16::from_le_bytes([raw[4], raw[5]]),
        u16::from_le_bytes([raw[6], raw[7]]),
        hex::encode(&raw[8..10]),
        hex::encode(&raw[10..16]),
    )
}
