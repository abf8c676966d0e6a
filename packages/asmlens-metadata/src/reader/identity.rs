//! Assembly and AssemblyRef identities.

use sha1::{Digest, Sha1};

use super::tables::TableId;
use super::ModuleReader;
use crate::error::Result;
use crate::model::{AssemblyIdentity, ASSEMBLY_FLAG_PUBLIC_KEY};

/// Derives the public-key token for an identity row.
///
/// Empty blob: no token. A blob that is already an 8-byte token (no
/// PublicKey flag) is used as-is. Otherwise the token is the last 8 bytes of
/// the SHA-1 of the full key, reversed.
pub fn public_key_token(blob: &[u8], flags: u32) -> Option<String> {
    if blob.is_empty() {
        return None;
    }
    if flags & ASSEMBLY_FLAG_PUBLIC_KEY == 0 && blob.len() == 8 {
        return Some(hex::encode(blob));
    }
    let digest = Sha1::digest(blob);
    let mut token: Vec<u8> = digest[digest.len() - 8..].to_vec();
    token.reverse();
    Some(hex::encode(token))
}

fn culture_or_neutral(culture: String) -> String {
    if culture.is_empty() {
        "neutral".to_string()
    } else {
        culture
    }
}

impl ModuleReader {
    /// Identity from the Assembly table; `None` for netmodules.
    pub fn assembly_identity(&self) -> Result<Option<AssemblyIdentity>> {
        if self.row_count(TableId::Assembly) == 0 {
            return Ok(None);
        }
        let t = TableId::Assembly;
        let version = format!(
            "{}.{}.{}.{}",
            self.cell(t, 1, 1)?,
            self.cell(t, 1, 2)?,
            self.cell(t, 1, 3)?,
            self.cell(t, 1, 4)?
        );
        // the definition row always carries a full key when it has one
        let flags = self.cell(t, 1, 5)? | ASSEMBLY_FLAG_PUBLIC_KEY;
        let key = self.blob(self.cell(t, 1, 6)?)?;
        Ok(Some(AssemblyIdentity {
            name: self.string(self.cell(t, 1, 7)?)?,
            version,
            culture: culture_or_neutral(self.string(self.cell(t, 1, 8)?)?),
            public_key_token: public_key_token(key, flags),
        }))
    }

    /// AssemblyRef rows in table order
    pub fn assembly_references(&self) -> Result<Vec<AssemblyIdentity>> {
        let t = TableId::AssemblyRef;
        (1..=self.row_count(t))
            .map(|row| self.assembly_reference(row))
            .collect()
    }

    pub(crate) fn assembly_reference(&self, row: u32) -> Result<AssemblyIdentity> {
        let t = TableId::AssemblyRef;
        let version = format!(
            "{}.{}.{}.{}",
            self.cell(t, row, 0)?,
            self.cell(t, row, 1)?,
            self.cell(t, row, 2)?,
            self.cell(t, row, 3)?
        );
        let flags = self.cell(t, row, 4)?;
        let key = self.blob(self.cell(t, row, 5)?)?;
        Ok(AssemblyIdentity {
            name: self.string(self.cell(t, row, 6)?)?,
            version,
            culture: culture_or_neutral(self.string(self.cell(t, row, 7)?)?),
            public_key_token: public_key_token(key, flags),
        })
    }
}
