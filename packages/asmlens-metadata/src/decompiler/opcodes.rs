//! CIL opcode table (ECMA-335 Partition III).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operand {
    None,
    /// int8 immediate (`ldc.i4.s`)
    I8,
    /// uint8 argument / local index or prefix argument
    U8,
    /// uint16 argument / local index
    U16,
    I32,
    I64,
    R4,
    R8,
    Token,
    /// `#US` token of `ldstr`
    String,
    ShortBranch,
    Branch,
    Switch,
}

impl Operand {
    /// Fixed operand size; `Switch` is variable and reports its count prefix only
    pub(crate) fn size(self) -> usize {
        match self {
            Operand::None => 0,
            Operand::I8 | Operand::U8 | Operand::ShortBranch => 1,
            Operand::U16 => 2,
            Operand::I32
            | Operand::R4
            | Operand::Token
            | Operand::String
            | Operand::Branch
            | Operand::Switch => 4,
            Operand::I64 | Operand::R8 => 8,
        }
    }
}

pub(crate) const TWO_BYTE_PREFIX: u8 = 0xFE;

/// Single-byte opcodes.
pub(crate) fn one_byte(code: u8) -> Option<(&'static str, Operand)> {
    use Operand::*;
    let entry = match code {
        0x00 => ("nop", None),
        0x01 => ("break", None),
        0x02 => ("ldarg.0", None),
        0x03 => ("ldarg.1", None),
        0x04 => ("ldarg.2", None),
        0x05 => ("ldarg.3", None),
        0x06 => ("ldloc.0", None),
        0x07 => ("ldloc.1", None),
        0x08 => ("ldloc.2", None),
        0x09 => ("ldloc.3", None),
        0x0A => ("stloc.0", None),
        0x0B => ("stloc.1", None),
        0x0C => ("stloc.2", None),
        0x0D => ("stloc.3", None),
        0x0E => ("ldarg.s", U8),
        0x0F => ("ldarga.s", U8),
        0x10 => ("starg.s", U8),
        0x11 => ("ldloc.s", U8),
        0x12 => ("ldloca.s", U8),
        0x13 => ("stloc.s", U8),
        0x14 => ("ldnull", None),
        0x15 => ("ldc.i4.m1", None),
        0x16 => ("ldc.i4.0", None),
        0x17 => ("ldc.i4.1", None),
        0x18 => ("ldc.i4.2", None),
        0x19 => ("ldc.i4.3", None),
        0x1A => ("ldc.i4.4", None),
        0x1B => ("ldc.i4.5", None),
        0x1C => ("ldc.i4.6", None),
        0x1D => ("ldc.i4.7", None),
        0x1E => ("ldc.i4.8", None),
        0x1F => ("ldc.i4.s", I8),
        0x20 => ("ldc.i4", I32),
        0x21 => ("ldc.i8", I64),
        0x22 => ("ldc.r4", R4),
        0x23 => ("ldc.r8", R8),
        0x25 => ("dup", None),
        0x26 => ("pop", None),
        0x27 => ("jmp", Token),
        0x28 => ("call", Token),
        0x29 => ("calli", Token),
        0x2A => ("ret", None),
        0x2B => ("br.s", ShortBranch),
        0x2C => ("brfalse.s", ShortBranch),
        0x2D => ("brtrue.s", ShortBranch),
        0x2E => ("beq.s", ShortBranch),
        0x2F => ("bge.s", ShortBranch),
        0x30 => ("bgt.s", ShortBranch),
        0x31 => ("ble.s", ShortBranch),
        0x32 => ("blt.s", ShortBranch),
        0x33 => ("bne.un.s", ShortBranch),
        0x34 => ("bge.un.s", ShortBranch),
        0x35 => ("bgt.un.s", ShortBranch),
        0x36 => ("ble.un.s", ShortBranch),
        0x37 => ("blt.un.s", ShortBranch),
        0x38 => ("br", Branch),
        0x39 => ("brfalse", Branch),
        0x3A => ("brtrue", Branch),
        0x3B => ("beq", Branch),
        0x3C => ("bge", Branch),
        0x3D => ("bgt", Branch),
        0x3E => ("ble", Branch),
        0x3F => ("blt", Branch),
        0x40 => ("bne.un", Branch),
        0x41 => ("bge.un", Branch),
        0x42 => ("bgt.un", Branch),
        0x43 => ("ble.un", Branch),
        0x44 => ("blt.un", Branch),
        0x45 => ("switch", Switch),
        0x46 => ("ldind.i1", None),
        0x47 => ("ldind.u1", None),
        0x48 => ("ldind.i2", None),
        0x49 => ("ldind.u2", None),
        0x4A => ("ldind.i4", None),
        0x4B => ("ldind.u4", None),
        0x4C => ("ldind.i8", None),
        0x4D => ("ldind.i", None),
        0x4E => ("ldind.r4", None),
        0x4F => ("ldind.r8", None),
        0x50 => ("ldind.ref", None),
        0x51 => ("stind.ref", None),
        0x52 => ("stind.i1", None),
        0x53 => ("stind.i2", None),
        0x54 => ("stind.i4", None),
        0x55 => ("stind.i8", None),
        0x56 => ("stind.r4", None),
        0x57 => ("stind.r8", None),
        0x58 => ("add", None),
        0x59 => ("sub", None),
        0x5A => ("mul", None),
        0x5B => ("div", None),
        0x5C => ("div.un", None),
        0x5D => ("rem", None),
        0x5E => ("rem.un", None),
        0x5F => ("and", None),
        0x60 => ("or", None),
        0x61 => ("xor", None),
        0x62 => ("shl", None),
        0x63 => ("shr", None),
        0x64 => ("shr.un", None),
        0x65 => ("neg", None),
        0x66 => ("not", None),
        0x67 => ("conv.i1", None),
        0x68 => ("conv.i2", None),
        0x69 => ("conv.i4", None),
        0x6A => ("conv.i8", None),
        0x6B => ("conv.r4", None),
        0x6C => ("conv.r8", None),
        0x6D => ("conv.u4", None),
        0x6E => ("conv.u8", None),
        0x6F => ("callvirt", Token),
        0x70 => ("cpobj", Token),
        0x71 => ("ldobj", Token),
        0x72 => ("ldstr", String),
        0x73 => ("newobj", Token),
        0x74 => ("castclass", Token),
        0x75 => ("isinst", Token),
        0x76 => ("conv.r.un", None),
        0x79 => ("unbox", Token),
        0x7A => ("throw", None),
        0x7B => ("ldfld", Token),
        0x7C => ("ldflda", Token),
        0x7D => ("stfld", Token),
        0x7E => ("ldsfld", Token),
        0x7F => ("ldsflda", Token),
        0x80 => ("stsfld", Token),
        0x81 => ("stobj", Token),
        0x82 => ("conv.ovf.i1.un", None),
        0x83 => ("conv.ovf.i2.un", None),
        0x84 => ("conv.ovf.i4.un", None),
        0x85 => ("conv.ovf.i8.un", None),
        0x86 => ("conv.ovf.u1.un", None),
        0x87 => ("conv.ovf.u2.un", None),
        0x88 => ("conv.ovf.u4.un", None),
        0x89 => ("conv.ovf.u8.un", None),
        0x8A => ("conv.ovf.i.un", None),
        0x8B => ("conv.ovf.u.un", None),
        0x8C => ("box", Token),
        0x8D => ("newarr", Token),
        0x8E => ("ldlen", None),
        0x8F => ("ldelema", Token),
        0x90 => ("ldelem.i1", None),
        0x91 => ("ldelem.u1", None),
        0x92 => ("ldelem.i2", None),
        0x93 => ("ldelem.u2", None),
        0x94 => ("ldelem.i4", None),
        0x95 => ("ldelem.u4", None),
        0x96 => ("ldelem.i8", None),
        0x97 => ("ldelem.i", None),
        0x98 => ("ldelem.r4", None),
        0x99 => ("ldelem.r8", None),
        0x9A => ("ldelem.ref", None),
        0x9B => ("stelem.i", None),
        0x9C => ("stelem.i1", None),
        0x9D => ("stelem.i2", None),
        0x9E => ("stelem.i4", None),
        0x9F => ("stelem.i8", None),
        0xA0 => ("stelem.r4", None),
        0xA1 => ("stelem.r8", None),
        0xA2 => ("stelem.ref", None),
        0xA3 => ("ldelem", Token),
        0xA4 => ("stelem", Token),
        0xA5 => ("unbox.any", Token),
        0xB3 => ("conv.ovf.i1", None),
        0xB4 => ("conv.ovf.u1", None),
        0xB5 => ("conv.ovf.i2", None),
        0xB6 => ("conv.ovf.u2", None),
        0xB7 => ("conv.ovf.i4", None),
        0xB8 => ("conv.ovf.u4", None),
        0xB9 => ("conv.ovf.i8", None),
        0xBA => ("conv.ovf.u8", None),
        0xC2 => ("refanyval", Token),
        0xC3 => ("ckfinite", None),
        0xC6 => ("mkrefany", Token),
        0xD0 => ("ldtoken", Token),
        0xD1 => ("conv.u2", None),
        0xD2 => ("conv.u1", None),
        0xD3 => ("conv.i", None),
        0xD4 => ("conv.ovf.i", None),
        0xD5 => ("conv.ovf.u", None),
        0xD6 => ("add.ovf", None),
        0xD7 => ("add.ovf.un", None),
        0xD8 => ("mul.ovf", None),
        0xD9 => ("mul.ovf.un", None),
        0xDA => ("sub.ovf", None),
        0xDB => ("sub.ovf.un", None),
        0xDC => ("endfinally", None),
        0xDD => ("leave", Branch),
        0xDE => ("leave.s", ShortBranch),
        0xDF => ("stind.i", None),
        0xE0 => ("conv.u", None),
        _ => return Option::None,
    };
    Some(entry)
}

/// Opcodes following the `0xFE` prefix.
pub(crate) fn two_byte(code: u8) -> Option<(&'static str, Operand)> {
    use Operand::*;
    let entry = match code {
        0x00 => ("arglist", None),
        0x01 => ("ceq", None),
        0x02 => ("cgt", None),
        0x03 => ("cgt.un", None),
        0x04 => ("clt", None),
        0x05 => ("clt.un", None),
        0x06 => ("ldftn", Token),
        0x07 => ("ldvirtftn", Token),
        0x09 => ("ldarg", U16),
        0x0A => ("ldarga", U16),
        0x0B => ("starg", U16),
        0x0C => ("ldloc", U16),
        0x0D => ("ldloca", U16),
        0x0E => ("stloc", U16),
        0x0F => ("localloc", None),
        0x11 => ("endfilter", None),
        0x12 => ("unaligned.", U8),
        0x13 => ("volatile.", None),
        0x14 => ("tail.", None),
        0x15 => ("initobj", Token),
        0x16 => ("constrained.", Token),
        0x17 => ("cpblk", None),
        0x18 => ("initblk", None),
        0x19 => ("no.", U8),
        0x1A => ("rethrow", None),
        0x1C => ("sizeof", Token),
        0x1D => ("refanytype", None),
        0x1E => ("readonly.", None),
        _ => return Option::None,
    };
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_common_opcodes() {
        assert_eq!(one_byte(0x2A), Some(("ret", Operand::None)));
        assert_eq!(one_byte(0x72), Some(("ldstr", Operand::String)));
        assert_eq!(one_byte(0x2B), Some(("br.s", Operand::ShortBranch)));
        assert_eq!(two_byte(0x01), Some(("ceq", Operand::None)));
        assert_eq!(two_byte(0x0C), Some(("ldloc", Operand::U16)));
    }

    #[test]
    fn test_reserved_codes_are_unknown() {
        assert_eq!(one_byte(0x24), Option::None);
        assert_eq!(one_byte(0xA6), Option::None);
        assert_eq!(one_byte(0xFE), Option::None);
        assert_eq!(two_byte(0x08), Option::None);
        assert_eq!(two_byte(0x1F), Option::None);
    }

    #[test]
    fn test_operand_sizes() {
        assert_eq!(Operand::ShortBranch.size(), 1);
        assert_eq!(Operand::Token.size(), 4);
        assert_eq!(Operand::R8.size(), 8);
    }
}
