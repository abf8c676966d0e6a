//! CIL listing for method bodies.

use std::fmt::Write;

use super::opcodes::{one_byte, two_byte, Operand, TWO_BYTE_PREFIX};
use crate::error::Result;
use crate::model::MethodDefinition;
use crate::reader::ModuleReader;

pub const NON_METHOD_PLACEHOLDER: &str = "// Disassembly is only available for methods.";

fn label(offset: i64) -> String {
    format!("IL_{:04x}", offset)
}

pub(crate) fn disassemble_method(reader: &ModuleReader, method: &MethodDefinition) -> Result<String> {
    let mut out = String::new();
    let _ = writeln!(out, "// Method: {}", reader.token_name(method.handle));

    let Some(body) = reader.method_body(method)? else {
        out.push_str("// No method body (abstract, extern or runtime-provided).\n");
        return Ok(out);
    };

    let _ = writeln!(out, "// Code size: {} (0x{:x})", body.code.len(), body.code.len());
    let _ = writeln!(out, ".maxstack {}", body.max_stack);
    if body.local_var_sig != 0 {
        let _ = writeln!(
            out,
            ".locals{} ({})",
            if body.init_locals { " init" } else { "" },
            reader.token_name(body.local_var_sig)
        );
    }
    out.push('\n');
    render_instructions(reader, body.code, &mut out);
    Ok(out)
}

fn render_instructions(reader: &ModuleReader, code: &[u8], out: &mut String) {
    let mut pc = 0usize;
    while pc < code.len() {
        let start = pc;
        let first = code[pc];
        pc += 1;

        let decoded = if first == TWO_BYTE_PREFIX {
            match code.get(pc) {
                Some(second) => {
                    pc += 1;
                    two_byte(*second).ok_or(u16::from_be_bytes([first, *second]))
                }
                None => Err(u16::from(first)),
            }
        } else {
            one_byte(first).ok_or(u16::from(first))
        };

        let (name, operand) = match decoded {
            Ok(entry) => entry,
            Err(raw) => {
                let _ = writeln!(out, "{}: .emitbyte 0x{:02x}", label(start as i64), raw);
                continue;
            }
        };

        let operand_len = operand.size();
        let Some(bytes) = code.get(pc..pc + operand_len) else {
            let _ = writeln!(out, "{}: {} // truncated operand", label(start as i64), name);
            return;
        };
        pc += operand_len;

        let text = match operand {
            Operand::None => String::new(),
            Operand::I8 => (bytes[0] as i8).to_string(),
            Operand::U8 => bytes[0].to_string(),
            Operand::U16 => u16::from_le_bytes([bytes[0], bytes[1]]).to_string(),
            Operand::I32 => i32::from_le_bytes(le4(bytes)).to_string(),
            Operand::I64 => i64::from_le_bytes(le8(bytes)).to_string(),
            Operand::R4 => f32::from_le_bytes(le4(bytes)).to_string(),
            Operand::R8 => f64::from_le_bytes(le8(bytes)).to_string(),
            Operand::Token | Operand::String => reader.token_name(u32::from_le_bytes(le4(bytes))),
            Operand::ShortBranch => label(pc as i64 + i64::from(bytes[0] as i8)),
            Operand::Branch => label(pc as i64 + i64::from(i32::from_le_bytes(le4(bytes)))),
            Operand::Switch => {
                let count = u32::from_le_bytes(le4(bytes)) as usize;
                let table_end = pc + count * 4;
                let Some(table) = code.get(pc..table_end) else {
                    let _ = writeln!(out, "{}: switch // truncated jump table", label(start as i64));
                    return;
                };
                pc = table_end;
                let targets: Vec<String> = table
                    .chunks_exact(4)
                    .map(|raw| label(pc as i64 + i64::from(i32::from_le_bytes(le4(raw)))))
                    .collect();
                format!("({})", targets.join(", "))
            }
        };

        if text.is_empty() {
            let _ = writeln!(out, "{}: {}", label(start as i64), name);
        } else {
            let _ = writeln!(out, "{}: {} {}", label(start as i64), name, text);
        }
    }
}

fn le4(bytes: &[u8]) -> [u8; 4] {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    raw
}

fn le8(bytes: &[u8]) -> [u8; 8] {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    raw
}
