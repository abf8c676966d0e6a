//! Bounds-checked little-endian reads over the module image.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{MetadataError, Result};

pub(crate) fn slice<'a>(
    data: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| MetadataError::truncated(what, offset))
}

pub(crate) fn u8_at(data: &[u8], offset: usize, what: &'static str) -> Result<u8> {
    data.get(offset)
        .copied()
        .ok_or_else(|| MetadataError::truncated(what, offset))
}

pub(crate) fn u16_at(data: &[u8], offset: usize, what: &'static str) -> Result<u16> {
    Ok(LittleEndian::read_u16(slice(data, offset, 2, what)?))
}

pub(crate) fn u32_at(data: &[u8], offset: usize, what: &'static str) -> Result<u32> {
    Ok(LittleEndian::read_u32(slice(data, offset, 4, what)?))
}

pub(crate) fn u64_at(data: &[u8], offset: usize, what: &'static str) -> Result<u64> {
    Ok(LittleEndian::read_u64(slice(data, offset, 8, what)?))
}

/// Reads an unsigned value of `width` bytes (2 or 4), as used by table columns.
pub(crate) fn uint_at(data: &[u8], offset: usize, width: usize, what: &'static str) -> Result<u32> {
    match width {
        1 => u8_at(data, offset, what).map(u32::from),
        2 => u16_at(data, offset, what).map(u32::from),
        _ => u32_at(data, offset, what),
    }
}

/// Decodes an ECMA-335 II.23.2 compressed unsigned integer.
/// Returns the value and the number of bytes consumed.
pub(crate) fn compressed_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let b0 = *bytes
        .first()
        .ok_or_else(|| MetadataError::Signature("empty compressed integer".into()))?;
    if b0 & 0x80 == 0 {
        return Ok((u32::from(b0), 1));
    }
    if b0 & 0xC0 == 0x80 {
        let b1 = *bytes
            .get(1)
            .ok_or_else(|| MetadataError::Signature("truncated 2-byte integer".into()))?;
        return Ok(((u32::from(b0 & 0x3F) << 8) | u32::from(b1), 2));
    }
    if b0 & 0xE0 == 0xC0 {
        let rest = bytes
            .get(1..4)
            .ok_or_else(|| MetadataError::Signature("truncated 4-byte integer".into()))?;
        let value = (u32::from(b0 & 0x1F) << 24)
            | (u32::from(rest[0]) << 16)
            | (u32::from(rest[1]) << 8)
            | u32::from(rest[2]);
        return Ok((value, 4));
    }
    Err(MetadataError::Signature(format!(
        "invalid compressed integer lead byte {:#04x}",
        b0
    )))
}

/// Forward-only reader over a signature or custom-attribute blob.
pub(crate) struct BlobCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BlobCursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub(crate) fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        let b = self
            .peek()
            .ok_or_else(|| MetadataError::Signature("unexpected end of blob".into()))?;
        self.pos += 1;
        Ok(b)
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let raw = self.take(2)?;
        Ok(LittleEndian::read_u16(raw))
    }

    pub(crate) fn compressed(&mut self) -> Result<u32> {
        let (value, used) = compressed_u32(&self.bytes[self.pos.min(self.bytes.len())..])?;
        self.pos += used;
        Ok(value)
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| MetadataError::Signature("blob read past end".into()))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    /// Reads a custom-attribute SerString; `None` encodes a null string.
    pub(crate) fn ser_string(&mut self) -> Result<Option<String>> {
        if self.peek() == Some(0xFF) {
            self.pos += 1;
            return Ok(None);
        }
        let len = self.compressed()? as usize;
        let raw = self.take(len)?;
        Ok(Some(String::from_utf8_lossy(raw).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_integer_widths() {
        assert_eq!(compressed_u32(&[0x03]).unwrap(), (0x03, 1));
        assert_eq!(compressed_u32(&[0x7F]).unwrap(), (0x7F, 1));
        assert_eq!(compressed_u32(&[0x80, 0x80]).unwrap(), (0x80, 2));
        assert_eq!(compressed_u32(&[0xAE, 0x57]).unwrap(), (0x2E57, 2));
        assert_eq!(compressed_u32(&[0xC0, 0x00, 0x40, 0x00]).unwrap(), (0x4000, 4));
        assert_eq!(
            compressed_u32(&[0xDF, 0xFF, 0xFF, 0xFF]).unwrap(),
            (0x1FFF_FFFF, 4)
        );
        assert!(compressed_u32(&[0xFF]).is_err());
        assert!(compressed_u32(&[0xC0, 0x00]).is_err());
    }

    #[test]
    fn test_bounds_checked_reads() {
        let data = [0x34, 0x12, 0x78, 0x56];
        assert_eq!(u16_at(&data, 0, "t").unwrap(), 0x1234);
        assert_eq!(u32_at(&data, 0, "t").unwrap(), 0x5678_1234);
        assert!(u32_at(&data, 1, "t").is_err());
        assert!(slice(&data, usize::MAX, 2, "t").is_err());
    }

    #[test]
    fn test_ser_string_null_and_value() {
        let mut cursor = BlobCursor::new(&[0xFF, 0x02, b'h', b'i']);
        assert_eq!(cursor.ser_string().unwrap(), None);
        assert_eq!(cursor.ser_string().unwrap().as_deref(), Some("hi"));
        assert!(cursor.is_empty());
    }
}
