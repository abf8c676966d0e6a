//! C#-flavoured declaration rendering.

use std::collections::HashMap;
use std::fmt::Write;

use crate::error::Result;
use crate::model::{
    FieldDefinition, MethodDefinition, PropertyDefinition, TypeDefinition, TypeKind,
    FIELD_INIT_ONLY, FIELD_LITERAL, FIELD_STATIC, METHOD_ABSTRACT, METHOD_FINAL, METHOD_VIRTUAL,
};
use crate::model::has_synthetic_name;
use crate::reader::ModuleReader;

const INDENT: &str = "    ";

fn simple_name(name: &str) -> &str {
    name.split('`').next().unwrap_or(name)
}

fn push_line(out: &mut String, depth: usize, line: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(line);
    out.push('\n');
}

pub(crate) fn render_type(reader: &ModuleReader, ty: &TypeDefinition) -> Result<String> {
    let mut out = String::new();
    let mut depth = 0;
    if !ty.namespace.is_empty() {
        push_line(&mut out, 0, &format!("namespace {}", ty.namespace));
        push_line(&mut out, 0, "{");
        depth = 1;
    }

    push_line(&mut out, depth, &type_header(ty));
    push_line(&mut out, depth, "{");

    let members = depth + 1;
    let mut wrote_section = false;

    let fields: Vec<FieldDefinition> = reader
        .fields_of(ty)?
        .into_iter()
        .filter(|f| !has_synthetic_name(&f.name))
        .collect();
    for field in &fields {
        if ty.kind == TypeKind::Enum {
            if field.flags & FIELD_LITERAL != 0 {
                push_line(&mut out, members, &format!("{},", field.name));
            }
            continue;
        }
        push_line(&mut out, members, &format!("{};", field_declaration(reader, field)?));
        wrote_section = true;
    }

    let properties: Vec<PropertyDefinition> = reader
        .properties_of(ty)?
        .into_iter()
        .filter(|p| !has_synthetic_name(&p.name))
        .collect();
    if wrote_section && !properties.is_empty() {
        out.push('\n');
    }
    for property in &properties {
        push_line(&mut out, members, &property_declaration(reader, property)?);
        wrote_section = true;
    }

    let methods: Vec<MethodDefinition> = reader
        .methods_of(ty)?
        .into_iter()
        .filter(|m| !has_synthetic_name(&m.name) && (!m.is_special_name() || m.is_constructor()))
        .collect();
    if wrote_section && !methods.is_empty() {
        out.push('\n');
    }
    for method in &methods {
        push_line(&mut out, members, &format!("{};", method_declaration(reader, ty, method)?));
    }

    push_line(&mut out, depth, "}");
    if depth == 1 {
        push_line(&mut out, 0, "}");
    }
    Ok(out)
}

fn type_header(ty: &TypeDefinition) -> String {
    let mut parts = vec![ty.visibility.keyword().to_string()];
    if ty.kind == TypeKind::Class {
        match (ty.is_abstract(), ty.is_sealed()) {
            (true, true) => parts.push("static".into()),
            (true, false) => parts.push("abstract".into()),
            (false, true) => parts.push("sealed".into()),
            _ => {}
        }
    }
    parts.push(ty.kind.keyword().into());
    parts.push(simple_name(&ty.name).into());

    let mut bases = Vec::new();
    if ty.kind == TypeKind::Class {
        if let Some(base) = ty.base_type.as_ref().filter(|b| !b.is_system_object()) {
            bases.push(simple_name(base.full_name()).to_string());
        }
    }
    if ty.kind != TypeKind::Enum && ty.kind != TypeKind::Delegate {
        bases.extend(
            ty.interfaces
                .iter()
                .map(|iface| simple_name(iface.full_name()).to_string()),
        );
    }

    let mut header = parts.join(" ");
    if !bases.is_empty() {
        let _ = write!(header, " : {}", bases.join(", "));
    }
    header
}

fn field_declaration(reader: &ModuleReader, field: &FieldDefinition) -> Result<String> {
    let mut parts = vec![field.access_keyword()];
    if field.flags & FIELD_LITERAL != 0 {
        parts.push("const");
    } else {
        if field.flags & FIELD_STATIC != 0 {
            parts.push("static");
        }
        if field.flags & FIELD_INIT_ONLY != 0 {
            parts.push("readonly");
        }
    }
    let ty = reader.type_sig_name(&reader.field_type(field)?);
    Ok(format!("{} {} {}", parts.join(" "), ty, field.name))
}

fn property_declaration(reader: &ModuleReader, property: &PropertyDefinition) -> Result<String> {
    let ty = reader.type_sig_name(&reader.property_type(property)?);
    let (getter, setter) = reader.property_accessors(property)?;
    let mut accessors = String::new();
    if getter {
        accessors.push_str(" get;");
    }
    if setter {
        accessors.push_str(" set;");
    }
    Ok(format!("{} {} {{{} }}", ty, property.name, accessors))
}

fn method_declaration(
    reader: &ModuleReader,
    owner: &TypeDefinition,
    method: &MethodDefinition,
) -> Result<String> {
    let sig = reader.method_signature(method)?;
    let names: HashMap<u16, String> = reader.parameter_names(method)?.into_iter().collect();
    let params: Vec<String> = sig
        .params
        .iter()
        .enumerate()
        .map(|(i, param)| {
            let sequence = i as u16 + 1;
            let name = names
                .get(&sequence)
                .filter(|n| !n.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("arg{}", i));
            format!("{} {}", reader.type_sig_name(param), name)
        })
        .collect();

    let mut modifiers = Vec::new();
    if owner.kind != TypeKind::Interface {
        modifiers.push(method.access_keyword());
    }
    if method.is_static() {
        modifiers.push("static");
    } else if owner.kind != TypeKind::Interface {
        if method.flags & METHOD_ABSTRACT != 0 {
            modifiers.push("abstract");
        } else if method.flags & METHOD_VIRTUAL != 0 && method.flags & METHOD_FINAL == 0 {
            modifiers.push("virtual");
        }
    }

    let head = if method.is_constructor() {
        simple_name(&owner.name).to_string()
    } else {
        format!("{} {}", reader.type_sig_name(&sig.ret), method.name)
    };
    let mut decl = modifiers.join(" ");
    if !decl.is_empty() {
        decl.push(' ');
    }
    let _ = write!(decl, "{}({})", head, params.join(", "));
    Ok(decl)
}

pub(crate) fn render_method(reader: &ModuleReader, method: &MethodDefinition) -> Result<String> {
    let owner = reader.type_definition(method.declaring_type)?;
    let mut out = String::new();
    let _ = writeln!(out, "// {}", owner.full_name);
    let decl = method_declaration(reader, &owner, method)?;
    match reader.method_body(method)? {
        Some(body) => {
            push_line(&mut out, 0, &decl);
            push_line(&mut out, 0, "{");
            push_line(
                &mut out,
                1,
                &format!("// IL code size: {} bytes (see disassembly)", body.code.len()),
            );
            push_line(&mut out, 0, "}");
        }
        None => push_line(&mut out, 0, &format!("{};", decl)),
    }
    Ok(out)
}

pub(crate) fn render_field(reader: &ModuleReader, field: &FieldDefinition) -> Result<String> {
    Ok(format!("{};\n", field_declaration(reader, field)?))
}

pub(crate) fn render_property(reader: &ModuleReader, property: &PropertyDefinition) -> Result<String> {
    let owner = reader.type_definition(property.declaring_type)?;
    Ok(format!(
        "// {}\n{}\n",
        owner.full_name,
        property_declaration(reader, property)?
    ))
}
