use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::AssemblyIdentity;
use crate::reader::tables::TableId;
use crate::reader::ModuleReader;

/// The module's own identity plus everything it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyReport {
    /// `None` for netmodules without an Assembly row
    pub assembly: Option<AssemblyIdentity>,
    pub module_name: String,
    pub references: Vec<AssemblyIdentity>,
    /// Unmanaged modules named by ModuleRef rows (P/Invoke targets)
    #[serde(default)]
    pub native_modules: Vec<String>,
}

pub fn extract_dependencies(reader: &ModuleReader) -> Result<DependencyReport> {
    let mut native_modules = Vec::new();
    for row in 1..=reader.row_count(TableId::ModuleRef) {
        let name = reader.string(reader.cell(TableId::ModuleRef, row, 0)?)?;
        if !name.is_empty() && !native_modules.contains(&name) {
            native_modules.push(name);
        }
    }

    let references = reader.assembly_references()?;
    tracing::debug!(
        references = references.len(),
        native = native_modules.len(),
        "extracted module dependencies"
    );

    Ok(DependencyReport {
        assembly: reader.assembly_identity()?,
        module_name: reader.module_name()?,
        references,
        native_modules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ModuleBuilder;

    const ECMA_KEY: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];

    #[test]
    fn test_identities_and_tokens() {
        let mut builder = ModuleBuilder::new("Consumer");
        builder.version(2, 1, 0, 7).public_key(&ECMA_KEY);
        builder.assembly_ref(
            "System.Runtime",
            [8, 0, 0, 0],
            &[0xb0, 0x3f, 0x5f, 0x7f, 0x11, 0xd5, 0x0a, 0x3a],
            "",
        );
        builder.assembly_ref("Acme.Resources", [1, 0, 0, 0], &[], "fr-FR");
        builder.assembly_ref("Strong", [3, 2, 1, 0], &ECMA_KEY, "");

        let reader = ModuleReader::from_bytes(builder.build()).unwrap();
        let report = extract_dependencies(&reader).unwrap();

        let own = report.assembly.unwrap();
        assert_eq!(own.name, "Consumer");
        assert_eq!(own.version, "2.1.0.7");
        assert_eq!(own.culture, "neutral");
        assert_eq!(own.public_key_token.as_deref(), Some("b77a5c561934e089"));
        assert_eq!(report.module_name, "Consumer.dll");

        assert_eq!(report.references.len(), 3);
        assert_eq!(report.references[0].name, "System.Runtime");
        assert_eq!(report.references[0].version, "8.0.0.0");
        assert_eq!(
            report.references[0].public_key_token.as_deref(),
            Some("b03f5f7f11d50a3a")
        );
        assert_eq!(report.references[1].culture, "fr-FR");
        assert_eq!(report.references[1].public_key_token, None);
        assert_eq!(
            report.references[2].public_key_token.as_deref(),
            Some("b77a5c561934e089")
        );
        assert!(report.native_modules.is_empty());
    }

    #[test]
    fn test_token_derivation_is_deterministic() {
        let build = || {
            let mut builder = ModuleBuilder::new("Repeat");
            builder.public_key(&[7u8; 160]);
            let reader = ModuleReader::from_bytes(builder.build()).unwrap();
            extract_dependencies(&reader).unwrap()
        };
        assert_eq!(build(), build());
    }
}
