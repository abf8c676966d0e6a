//! Human-readable names for signatures and metadata tokens.

use super::signature::{self, TypeSig};
use super::tables::{split_token, CodedIndex, TableId};
use super::{BlobCursor, ModuleReader};
use crate::error::Result;

const USER_STRING_TABLE: u8 = 0x70;
const METHOD_SPEC_SIG: u8 = 0x0A;

impl ModuleReader {
    /// C#-flavoured rendering of a type signature.
    pub fn type_sig_name(&self, sig: &TypeSig) -> String {
        match sig {
            TypeSig::Void => "void".into(),
            TypeSig::Bool => "bool".into(),
            TypeSig::Char => "char".into(),
            TypeSig::I1 => "sbyte".into(),
            TypeSig::U1 => "byte".into(),
            TypeSig::I2 => "short".into(),
            TypeSig::U2 => "ushort".into(),
            TypeSig::I4 => "int".into(),
            TypeSig::U4 => "uint".into(),
            TypeSig::I8 => "long".into(),
            TypeSig::U8 => "ulong".into(),
            TypeSig::R4 => "float".into(),
            TypeSig::R8 => "double".into(),
            TypeSig::String => "string".into(),
            TypeSig::Object => "object".into(),
            TypeSig::IntPtr => "nint".into(),
            TypeSig::UIntPtr => "nuint".into(),
            TypeSig::TypedByRef => "TypedReference".into(),
            TypeSig::Named { token, .. } => self
                .type_token_name(*token)
                .unwrap_or_else(|_| format!("{:#010x}", token)),
            TypeSig::Ptr(inner) => format!("{}*", self.type_sig_name(inner)),
            TypeSig::ByRef(inner) => format!("ref {}", self.type_sig_name(inner)),
            TypeSig::SzArray(inner) => format!("{}[]", self.type_sig_name(inner)),
            TypeSig::Array { element, rank } => format!(
                "{}[{}]",
                self.type_sig_name(element),
                ",".repeat(rank.saturating_sub(1) as usize)
            ),
            TypeSig::GenericInst { generic, args } => {
                let base = self.type_sig_name(generic);
                let base = strip_arity(&base);
                let args: Vec<String> = args.iter().map(|a| self.type_sig_name(a)).collect();
                format!("{}<{}>", base, args.join(", "))
            }
            TypeSig::Var(n) => format!("!{}", n),
            TypeSig::MVar(n) => format!("!!{}", n),
            TypeSig::FnPtr => "method*".into(),
        }
    }

    fn type_token_name(&self, token: u32) -> Result<String> {
        let (table, row) = split_token(token);
        match TableId::from_index(table) {
            Some(TableId::TypeDef) => self.type_def_full_name(row),
            Some(TableId::TypeRef) => Ok(self.type_ref_parts(row)?.2),
            Some(TableId::TypeSpec) => {
                let blob = self.blob(self.cell(TableId::TypeSpec, row, 0)?)?;
                Ok(self.type_sig_name(&signature::parse_type_spec(blob)?))
            }
            _ => Ok(format!("{:#010x}", token)),
        }
    }

    /// Best-effort display name for an instruction operand token.
    pub fn token_name(&self, token: u32) -> String {
        self.try_token_name(token)
            .unwrap_or_else(|_| format!("{:#010x}", token))
    }

    fn try_token_name(&self, token: u32) -> Result<String> {
        let (table, row) = split_token(token);
        if table == USER_STRING_TABLE {
            return Ok(quote(&self.user_string(row)?));
        }
        match TableId::from_index(table) {
            Some(TableId::TypeDef) | Some(TableId::TypeRef) | Some(TableId::TypeSpec) => {
                self.type_token_name(token)
            }
            Some(TableId::MethodDef) => {
                let name = self.string(self.cell(TableId::MethodDef, row, 3)?)?;
                match self.method_owner(row)? {
                    Some(owner) => Ok(format!("{}::{}", self.type_def_full_name(owner)?, name)),
                    None => Ok(name),
                }
            }
            Some(TableId::Field) => {
                let name = self.string(self.cell(TableId::Field, row, 1)?)?;
                match self.field_owner(row)? {
                    Some(owner) => Ok(format!("{}::{}", self.type_def_full_name(owner)?, name)),
                    None => Ok(name),
                }
            }
            Some(TableId::MemberRef) => {
                let name = self.string(self.cell(TableId::MemberRef, row, 1)?)?;
                let parent = self.cell(TableId::MemberRef, row, 0)?;
                let owner = match CodedIndex::MemberRefParent.decode(parent) {
                    Some((TableId::ModuleRef, r)) => {
                        self.string(self.cell(TableId::ModuleRef, r, 0)?)?
                    }
                    Some((TableId::MethodDef, r)) => {
                        return self.try_token_name(TableId::MethodDef.token(r))
                    }
                    Some((table, r)) => self.type_token_name(table.token(r))?,
                    None => return Ok(name),
                };
                Ok(format!("{}::{}", owner, name))
            }
            Some(TableId::MethodSpec) => {
                let method = self.cell(TableId::MethodSpec, row, 0)?;
                let base = match CodedIndex::MethodDefOrRef.decode(method) {
                    Some((table, r)) => self.try_token_name(table.token(r))?,
                    None => String::new(),
                };
                let blob = self.blob(self.cell(TableId::MethodSpec, row, 1)?)?;
                let mut cursor = BlobCursor::new(blob);
                let mut args = Vec::new();
                if cursor.u8()? == METHOD_SPEC_SIG {
                    let count = cursor.compressed()?;
                    for _ in 0..count {
                        args.push(self.type_sig_name(&signature::parse_type(&mut cursor)?));
                    }
                }
                Ok(format!("{}<{}>", base, args.join(", ")))
            }
            Some(TableId::StandAloneSig) => Ok(format!("signature #{}", row)),
            Some(other) => Ok(format!("{} #{}", other.name(), row)),
            None => Ok(format!("{:#010x}", token)),
        }
    }
}

/// `List`1` → `List`
fn strip_arity(name: &str) -> &str {
    match name.rfind('`') {
        Some(at) if name[at + 1..].chars().all(|c| c.is_ascii_digit()) => &name[..at],
        _ => name,
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
