//! ECMA-335 II.23.2 signature decoding.

use super::bytes::BlobCursor;
use super::tables::TableId;
use crate::error::{MetadataError, Result};

const ELEMENT_VOID: u8 = 0x01;
const ELEMENT_BOOLEAN: u8 = 0x02;
const ELEMENT_CHAR: u8 = 0x03;
const ELEMENT_I1: u8 = 0x04;
const ELEMENT_U1: u8 = 0x05;
const ELEMENT_I2: u8 = 0x06;
const ELEMENT_U2: u8 = 0x07;
const ELEMENT_I4: u8 = 0x08;
const ELEMENT_U4: u8 = 0x09;
const ELEMENT_I8: u8 = 0x0A;
const ELEMENT_U8: u8 = 0x0B;
const ELEMENT_R4: u8 = 0x0C;
const ELEMENT_R8: u8 = 0x0D;
const ELEMENT_STRING: u8 = 0x0E;
const ELEMENT_PTR: u8 = 0x0F;
const ELEMENT_BYREF: u8 = 0x10;
const ELEMENT_VALUETYPE: u8 = 0x11;
const ELEMENT_CLASS: u8 = 0x12;
const ELEMENT_VAR: u8 = 0x13;
const ELEMENT_ARRAY: u8 = 0x14;
const ELEMENT_GENERICINST: u8 = 0x15;
const ELEMENT_TYPEDBYREF: u8 = 0x16;
const ELEMENT_I: u8 = 0x18;
const ELEMENT_U: u8 = 0x19;
const ELEMENT_FNPTR: u8 = 0x1B;
const ELEMENT_OBJECT: u8 = 0x1C;
const ELEMENT_SZARRAY: u8 = 0x1D;
const ELEMENT_MVAR: u8 = 0x1E;
const ELEMENT_CMOD_REQD: u8 = 0x1F;
const ELEMENT_CMOD_OPT: u8 = 0x20;
const ELEMENT_SENTINEL: u8 = 0x41;
const ELEMENT_PINNED: u8 = 0x45;

const CALLCONV_GENERIC: u8 = 0x10;
const CALLCONV_HASTHIS: u8 = 0x20;
const FIELD_SIG: u8 = 0x06;
const PROPERTY_SIG: u8 = 0x08;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSig {
    Void,
    Bool,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    Object,
    IntPtr,
    UIntPtr,
    TypedByRef,
    /// TypeDef / TypeRef / TypeSpec token
    Named { token: u32, value_type: bool },
    Ptr(Box<TypeSig>),
    ByRef(Box<TypeSig>),
    SzArray(Box<TypeSig>),
    Array { element: Box<TypeSig>, rank: u32 },
    GenericInst { generic: Box<TypeSig>, args: Vec<TypeSig> },
    Var(u32),
    MVar(u32),
    FnPtr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSig {
    pub has_this: bool,
    pub generic_params: u32,
    pub ret: TypeSig,
    pub params: Vec<TypeSig>,
}

/// Decodes a TypeDefOrRefOrSpecEncoded value (II.23.2.8) into a token.
pub(crate) fn type_def_or_ref_token(encoded: u32) -> Result<u32> {
    let table = match encoded & 0x3 {
        0 => TableId::TypeDef,
        1 => TableId::TypeRef,
        2 => TableId::TypeSpec,
        _ => {
            return Err(MetadataError::Signature(format!(
                "invalid TypeDefOrRef tag in {:#x}",
                encoded
            )))
        }
    };
    Ok(table.token(encoded >> 2))
}

pub(crate) fn parse_type(cursor: &mut BlobCursor<'_>) -> Result<TypeSig> {
    let element = cursor.u8()?;
    let sig = match element {
        ELEMENT_VOID => TypeSig::Void,
        ELEMENT_BOOLEAN => TypeSig::Bool,
        ELEMENT_CHAR => TypeSig::Char,
        ELEMENT_I1 => TypeSig::I1,
        ELEMENT_U1 => TypeSig::U1,
        ELEMENT_I2 => TypeSig::I2,
        ELEMENT_U2 => TypeSig::U2,
        ELEMENT_I4 => TypeSig::I4,
        ELEMENT_U4 => TypeSig::U4,
        ELEMENT_I8 => TypeSig::I8,
        ELEMENT_U8 => TypeSig::U8,
        ELEMENT_R4 => TypeSig::R4,
        ELEMENT_R8 => TypeSig::R8,
        ELEMENT_STRING => TypeSig::String,
        ELEMENT_OBJECT => TypeSig::Object,
        ELEMENT_I => TypeSig::IntPtr,
        ELEMENT_U => TypeSig::UIntPtr,
        ELEMENT_TYPEDBYREF => TypeSig::TypedByRef,
        ELEMENT_PTR => TypeSig::Ptr(Box::new(parse_type(cursor)?)),
        ELEMENT_BYREF => TypeSig::ByRef(Box::new(parse_type(cursor)?)),
        ELEMENT_SZARRAY => TypeSig::SzArray(Box::new(parse_type(cursor)?)),
        ELEMENT_VALUETYPE | ELEMENT_CLASS => TypeSig::Named {
            token: type_def_or_ref_token(cursor.compressed()?)?,
            value_type: element == ELEMENT_VALUETYPE,
        },
        ELEMENT_VAR => TypeSig::Var(cursor.compressed()?),
        ELEMENT_MVAR => TypeSig::MVar(cursor.compressed()?),
        ELEMENT_ARRAY => {
            let element = parse_type(cursor)?;
            let rank = cursor.compressed()?;
            let sizes = cursor.compressed()?;
            for _ in 0..sizes {
                cursor.compressed()?;
            }
            let bounds = cursor.compressed()?;
            for _ in 0..bounds {
                // signed compressed; the magnitude is irrelevant for rendering
                cursor.compressed()?;
            }
            TypeSig::Array {
                element: Box::new(element),
                rank,
            }
        }
        ELEMENT_GENERICINST => {
            let generic = parse_type(cursor)?;
            let count = cursor.compressed()?;
            let args = (0..count)
                .map(|_| parse_type(cursor))
                .collect::<Result<Vec<_>>>()?;
            TypeSig::GenericInst {
                generic: Box::new(generic),
                args,
            }
        }
        ELEMENT_FNPTR => {
            parse_method_sig_from(cursor)?;
            TypeSig::FnPtr
        }
        ELEMENT_CMOD_REQD | ELEMENT_CMOD_OPT => {
            cursor.compressed()?;
            parse_type(cursor)?
        }
        ELEMENT_PINNED | ELEMENT_SENTINEL => parse_type(cursor)?,
        other => {
            return Err(MetadataError::Signature(format!(
                "unknown element type {:#04x}",
                other
            )))
        }
    };
    Ok(sig)
}

fn parse_method_sig_from(cursor: &mut BlobCursor<'_>) -> Result<MethodSig> {
    let conv = cursor.u8()?;
    let generic_params = if conv & CALLCONV_GENERIC != 0 {
        cursor.compressed()?
    } else {
        0
    };
    let count = cursor.compressed()?;
    let ret = parse_type(cursor)?;
    let mut params = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if cursor.peek() == Some(ELEMENT_SENTINEL) {
            cursor.u8()?;
        }
        params.push(parse_type(cursor)?);
    }
    Ok(MethodSig {
        has_this: conv & CALLCONV_HASTHIS != 0,
        generic_params,
        ret,
        params,
    })
}

pub fn parse_method_sig(blob: &[u8]) -> Result<MethodSig> {
    parse_method_sig_from(&mut BlobCursor::new(blob))
}

pub fn parse_field_sig(blob: &[u8]) -> Result<TypeSig> {
    let mut cursor = BlobCursor::new(blob);
    let lead = cursor.u8()?;
    if lead & 0x0F != FIELD_SIG {
        return Err(MetadataError::Signature(format!(
            "expected FIELD signature, found {:#04x}",
            lead
        )));
    }
    parse_type(&mut cursor)
}

/// Returns the property type; indexer parameters are skipped.
pub fn parse_property_sig(blob: &[u8]) -> Result<TypeSig> {
    let mut cursor = BlobCursor::new(blob);
    let lead = cursor.u8()?;
    if lead & 0x0F != PROPERTY_SIG {
        return Err(MetadataError::Signature(format!(
            "expected PROPERTY signature, found {:#04x}",
            lead
        )));
    }
    cursor.compressed()?;
    parse_type(&mut cursor)
}

pub fn parse_type_spec(blob: &[u8]) -> Result<TypeSig> {
    parse_type(&mut BlobCursor::new(blob))
}
