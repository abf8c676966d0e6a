use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Error, Debug)]
pub enum MetadataError {
    /// The file is not a managed module (missing PE, CLI or metadata headers)
    #[error("Invalid module: {0}")]
    InvalidModule(String),

    #[error("Truncated metadata: {what} at offset {offset:#x}")]
    Truncated { what: &'static str, offset: usize },

    #[error("Index out of range: {table} row {row} (table has {rows} rows)")]
    BadIndex {
        table: &'static str,
        row: u32,
        rows: u32,
    },

    #[error("Malformed signature blob: {0}")]
    Signature(String),

    #[error("Entity handle not found: {0:#010x}")]
    HandleNotFound(u32),

    #[error("Failed to read module {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MetadataError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::InvalidModule(msg.into())
    }

    pub fn truncated(what: &'static str, offset: usize) -> Self {
        Self::Truncated { what, offset }
    }

    /// True when the bytes themselves are not a usable module, as opposed to an I/O failure
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            MetadataError::InvalidModule(_)
                | MetadataError::Truncated { .. }
                | MetadataError::BadIndex { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_classification() {
        assert!(MetadataError::invalid("no BSJB").is_invalid_input());
        assert!(MetadataError::truncated("stream header", 12).is_invalid_input());
        assert!(!MetadataError::HandleNotFound(0x0600_0001).is_invalid_input());
    }

    #[test]
    fn test_handle_display_is_hex() {
        let msg = MetadataError::HandleNotFound(0x0200_0002).to_string();
        assert_eq!(msg, "Entity handle not found: 0x02000002");
    }
}
