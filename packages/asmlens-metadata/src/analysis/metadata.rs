use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::reader::{
    ModuleReader, COMIMAGE_FLAGS_32BITPREFERRED, COMIMAGE_FLAGS_32BITREQUIRED,
};

const MACHINE_I386: u16 = 0x014C;
const MACHINE_AMD64: u16 = 0x8664;
const MACHINE_ARM: u16 = 0x01C4;
const MACHINE_ARM64: u16 = 0xAA64;

/// Assembly-level summary shown on the analysis overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    pub name: String,
    pub version: String,
    pub culture: String,
    pub public_key_token: Option<String>,
    pub display_name: String,
    pub module_name: String,
    pub mvid: Option<String>,
    pub runtime_version: String,
    pub target_framework: Option<String>,
    pub architecture: String,
    pub is_executable: bool,
    pub entry_point: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub company: Option<String>,
    pub product: Option<String>,
    pub copyright: Option<String>,
    pub file_version: Option<String>,
    pub informational_version: Option<String>,
    pub file_size: u64,
    pub type_count: usize,
    pub reference_count: usize,
}

pub(crate) fn architecture(machine: u16, pe32_plus: bool, cli_flags: u32) -> &'static str {
    match machine {
        MACHINE_AMD64 => "x64",
        MACHINE_ARM64 => "ARM64",
        MACHINE_ARM => "ARM",
        MACHINE_I386 if pe32_plus => "x64",
        MACHINE_I386 => {
            let required = cli_flags & COMIMAGE_FLAGS_32BITREQUIRED != 0;
            let preferred = cli_flags & COMIMAGE_FLAGS_32BITPREFERRED != 0;
            match (required, preferred) {
                (true, true) => "AnyCPU (32-bit preferred)",
                (true, false) => "x86",
                _ => "AnyCPU",
            }
        }
        _ => "Unknown",
    }
}

fn attribute(reader: &ModuleReader, name: &str) -> Result<Option<String>> {
    Ok(reader
        .assembly_attribute(name)?
        .filter(|value| !value.trim().is_empty()))
}

pub fn extract_metadata(reader: &ModuleReader) -> Result<AssemblyMetadata> {
    let module_name = reader.module_name()?;
    let identity = reader.assembly_identity()?;
    let (name, version, culture, public_key_token, display_name) = match identity {
        Some(id) => {
            let display = id.display_name();
            (id.name, id.version, id.culture, id.public_key_token, display)
        }
        None => (
            module_name.clone(),
            "0.0.0.0".to_string(),
            "neutral".to_string(),
            None,
            module_name.clone(),
        ),
    };

    let entry_point = reader.entry_point_token();
    Ok(AssemblyMetadata {
        name,
        version,
        culture,
        public_key_token,
        display_name,
        module_name,
        mvid: reader.module_mvid()?,
        runtime_version: reader.runtime_version().to_string(),
        target_framework: attribute(reader, "TargetFramework")?,
        architecture: architecture(reader.machine(), reader.is_pe32_plus(), reader.cli_flags())
            .to_string(),
        is_executable: entry_point.is_some(),
        entry_point: entry_point.map(|token| reader.token_name(token)),
        title: attribute(reader, "AssemblyTitle")?,
        description: attribute(reader, "AssemblyDescription")?,
        company: attribute(reader, "AssemblyCompany")?,
        product: attribute(reader, "AssemblyProduct")?,
        copyright: attribute(reader, "AssemblyCopyright")?,
        file_version: attribute(reader, "AssemblyFileVersion")?,
        informational_version: attribute(reader, "AssemblyInformationalVersion")?,
        file_size: reader.file_size() as u64,
        type_count: reader.type_definitions()?.len(),
        reference_count: reader.assembly_references()?.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::COMIMAGE_FLAGS_ILONLY;
    use crate::testing::{ModuleBuilder, TypeDecl};

    #[test]
    fn test_architecture_from_headers() {
        assert_eq!(architecture(MACHINE_I386, false, COMIMAGE_FLAGS_ILONLY), "AnyCPU");
        assert_eq!(
            architecture(MACHINE_I386, false, COMIMAGE_FLAGS_ILONLY | COMIMAGE_FLAGS_32BITREQUIRED),
            "x86"
        );
        assert_eq!(
            architecture(
                MACHINE_I386,
                false,
                COMIMAGE_FLAGS_32BITREQUIRED | COMIMAGE_FLAGS_32BITPREFERRED
            ),
            "AnyCPU (32-bit preferred)"
        );
        assert_eq!(architecture(MACHINE_AMD64, true, 0), "x64");
        assert_eq!(architecture(MACHINE_ARM64, true, 0), "ARM64");
        assert_eq!(architecture(0x1234, false, 0), "Unknown");
    }

    #[test]
    fn test_extracts_identity_and_attributes() {
        let mut builder = ModuleBuilder::new("Tool");
        builder.version(3, 4, 5, 6);
        builder.assembly_attribute("System.Reflection", "AssemblyTitleAttribute", Some("The Tool"));
        builder.assembly_attribute("System.Reflection", "AssemblyCompanyAttribute", Some("Acme"));
        builder.assembly_attribute("System.Reflection", "AssemblyProductAttribute", Some("  "));
        builder.assembly_attribute(
            "System.Runtime.Versioning",
            "TargetFrameworkAttribute",
            Some(".NETCoreApp,Version=v8.0"),
        );
        let object = builder.type_ref("System", "Object");
        let program = builder.add_type(TypeDecl::class("Tool", "Program").extends(object));
        let main = builder.add_static_method(program, "Main", &[]);
        builder.executable(main);

        let reader = ModuleReader::from_bytes(builder.build()).unwrap();
        let meta = extract_metadata(&reader).unwrap();

        assert_eq!(meta.name, "Tool");
        assert_eq!(meta.version, "3.4.5.6");
        assert_eq!(meta.culture, "neutral");
        assert_eq!(
            meta.display_name,
            "Tool, Version=3.4.5.6, Culture=neutral, PublicKeyToken=null"
        );
        assert_eq!(meta.module_name, "Tool.exe");
        assert_eq!(meta.runtime_version, "v4.0.30319");
        assert_eq!(meta.architecture, "AnyCPU");
        assert!(meta.is_executable);
        assert_eq!(meta.entry_point.as_deref(), Some("Tool.Program::Main"));
        assert_eq!(meta.title.as_deref(), Some("The Tool"));
        assert_eq!(meta.company.as_deref(), Some("Acme"));
        assert_eq!(meta.product, None);
        assert_eq!(
            meta.target_framework.as_deref(),
            Some(".NETCoreApp,Version=v8.0")
        );
        assert_eq!(meta.type_count, 2);
        assert_eq!(meta.file_size as usize, reader.file_size());
    }
}
