//! On-demand declaration text and CIL disassembly for single entities.
//!
//! Results are cached per `(module path, handle)` with a TTL and a capacity
//! bound; opened modules are shared through [`ModuleCache`].

mod disassembly;
mod module_cache;
mod opcodes;
mod source;

pub use disassembly::NON_METHOD_PLACEHOLDER;
pub use module_cache::{ModuleCache, DEFAULT_MODULE_BUDGET_BYTES, DEFAULT_MODULE_IDLE};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use serde::{Deserialize, Serialize};

use crate::error::{MetadataError, Result};
use crate::reader::tables::{split_token, TableId};
use crate::reader::ModuleReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Type,
    Method,
    Field,
    Property,
}

impl EntityKind {
    pub fn from_handle(handle: u32) -> Option<Self> {
        match TableId::from_index(split_token(handle).0)? {
            TableId::TypeDef => Some(EntityKind::Type),
            TableId::MethodDef => Some(EntityKind::Method),
            TableId::Field => Some(EntityKind::Field),
            TableId::Property => Some(EntityKind::Property),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompiledEntity {
    pub handle: u32,
    pub kind: EntityKind,
    pub name: String,
    pub source: String,
    pub disassembly: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecompilerCacheConfig {
    pub ttl: Duration,
    pub max_entries: u64,
    /// Total image bytes the shared [`ModuleCache`] may keep resident
    pub module_budget_bytes: u64,
    pub module_idle: Duration,
}

impl Default for DecompilerCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            max_entries: 1024,
            module_budget_bytes: DEFAULT_MODULE_BUDGET_BYTES,
            module_idle: DEFAULT_MODULE_IDLE,
        }
    }
}

/// Decompilation port used by the service layer.
pub trait Decompiler: Send + Sync {
    fn decompile(&self, module: &Path, handle: u32) -> Result<Arc<DecompiledEntity>>;

    /// Drops everything cached for one module (deleted analyses).
    fn evict_module(&self, module: &Path);

    fn dispose(&self);
}

/// Renders one entity without caching.
pub fn decompile_entity(reader: &ModuleReader, handle: u32) -> Result<DecompiledEntity> {
    let kind = EntityKind::from_handle(handle).ok_or(MetadataError::HandleNotFound(handle))?;
    let (name, source, disassembly) = match kind {
        EntityKind::Type => {
            let ty = reader.type_definition(handle)?;
            let source = source::render_type(reader, &ty)?;
            (ty.full_name, source, NON_METHOD_PLACEHOLDER.to_string())
        }
        EntityKind::Method => {
            let method = reader.method(handle)?;
            (
                reader.token_name(handle),
                source::render_method(reader, &method)?,
                disassembly::disassemble_method(reader, &method)?,
            )
        }
        EntityKind::Field => {
            let field = reader.field(handle)?;
            (
                reader.token_name(handle),
                source::render_field(reader, &field)?,
                NON_METHOD_PLACEHOLDER.to_string(),
            )
        }
        EntityKind::Property => {
            let property = reader.property(handle)?;
            let owner = reader.type_definition(property.declaring_type)?;
            (
                format!("{}::{}", owner.full_name, property.name),
                source::render_property(reader, &property)?,
                NON_METHOD_PLACEHOLDER.to_string(),
            )
        }
    };

    Ok(DecompiledEntity {
        handle,
        kind,
        name,
        source,
        disassembly,
    })
}

type EntityKey = (PathBuf, u32);

/// TTL-bounded cache of rendered entities over a shared [`ModuleCache`].
pub struct CachingDecompiler {
    entities: Cache<EntityKey, Arc<DecompiledEntity>>,
    modules: Arc<ModuleCache>,
}

impl CachingDecompiler {
    pub fn new(config: DecompilerCacheConfig) -> Self {
        let modules = ModuleCache::with_limits(config.module_budget_bytes, config.module_idle);
        Self::with_modules(config, Arc::new(modules))
    }

    pub fn with_modules(config: DecompilerCacheConfig, modules: Arc<ModuleCache>) -> Self {
        let entities = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .eviction_listener(|key: Arc<EntityKey>, _value, cause| {
                tracing::debug!(
                    module = %key.0.display(),
                    handle = key.1,
                    ?cause,
                    "decompiled entity evicted"
                );
            })
            .build();
        Self { entities, modules }
    }

    pub fn modules(&self) -> &Arc<ModuleCache> {
        &self.modules
    }

    pub fn entry_count(&self) -> u64 {
        self.entities.run_pending_tasks();
        self.entities.entry_count()
    }
}

impl Decompiler for CachingDecompiler {
    fn decompile(&self, module: &Path, handle: u32) -> Result<Arc<DecompiledEntity>> {
        let key = (module.to_path_buf(), handle);
        if let Some(hit) = self.entities.get(&key) {
            return Ok(hit);
        }

        let reader = self.modules.get_or_open(module)?;
        let entity = Arc::new(decompile_entity(&reader, handle)?);
        self.entities.insert(key, Arc::clone(&entity));
        Ok(entity)
    }

    fn evict_module(&self, module: &Path) {
        let stale: Vec<Arc<EntityKey>> = self
            .entities
            .iter()
            .filter(|(key, _)| key.0.as_path() == module)
            .map(|(key, _)| key)
            .collect();
        for key in stale {
            self.entities.invalidate(key.as_ref());
        }
        self.modules.evict(module);
    }

    fn dispose(&self) {
        self.entities.invalidate_all();
        self.entities.run_pending_tasks();
        self.modules.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ModuleBuilder, TypeDecl};

    fn write_module(dir: &Path) -> (PathBuf, u32, u32, u32, u32) {
        let mut builder = ModuleBuilder::new("Decomp");
        let object = builder.type_ref("System", "Object");
        let ty = builder.add_type(TypeDecl::class("Acme", "Widget").extends(object));
        let field = builder.add_field(ty, "count");
        let method = builder.add_static_method(ty, "Twice", &["value"]);
        builder.with_body(method, Some(vec![0x02, 0x18, 0x5A, 0x2A]));
        let property = builder.add_property(ty, "Label");
        let path = dir.join("module.dll");
        std::fs::write(&path, builder.build()).unwrap();
        (path, ty, field, method, property)
    }

    #[test]
    fn test_entities_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let (path, ty, field, method, property) = write_module(dir.path());
        let decompiler = CachingDecompiler::new(DecompilerCacheConfig::default());

        let entity = decompiler.decompile(&path, method).unwrap();
        assert_eq!(entity.kind, EntityKind::Method);
        assert_eq!(entity.name, "Acme.Widget::Twice");
        assert!(entity.source.contains("public static int Twice(int value)"));
        assert!(entity.disassembly.contains("IL_0000: ldarg.0"));
        assert!(entity.disassembly.contains("IL_0001: ldc.i4.2"));
        assert!(entity.disassembly.contains("IL_0002: mul"));

        let entity = decompiler.decompile(&path, ty).unwrap();
        assert_eq!(entity.kind, EntityKind::Type);
        assert_eq!(entity.name, "Acme.Widget");
        assert_eq!(entity.disassembly, NON_METHOD_PLACEHOLDER);

        let entity = decompiler.decompile(&path, field).unwrap();
        assert_eq!(entity.source, "private int count;\n");
        assert_eq!(entity.disassembly, NON_METHOD_PLACEHOLDER);

        let entity = decompiler.decompile(&path, property).unwrap();
        assert_eq!(entity.name, "Acme.Widget::Label");
        assert!(entity.source.contains("string Label {"));
    }

    #[test]
    fn test_cache_hits_and_module_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _, _, method, _) = write_module(dir.path());
        let decompiler = CachingDecompiler::new(DecompilerCacheConfig::default());

        let first = decompiler.decompile(&path, method).unwrap();
        let second = decompiler.decompile(&path, method).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(decompiler.entry_count(), 1);

        decompiler.evict_module(&path);
        assert_eq!(decompiler.entry_count(), 0);
        assert!(decompiler.modules().is_empty());

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            decompiler.decompile(&path, method),
            Err(MetadataError::Io { .. })
        ));
    }

    #[test]
    fn test_unknown_handles() {
        let dir = tempfile::tempdir().unwrap();
        let (path, ..) = write_module(dir.path());
        let decompiler = CachingDecompiler::new(DecompilerCacheConfig::default());

        for handle in [0x0200_0063, 0x0600_0000, 0x0100_0001, 0x1700_0009] {
            assert!(matches!(
                decompiler.decompile(&path, handle),
                Err(MetadataError::HandleNotFound(h)) if h == handle
            ));
        }
        decompiler.dispose();
        assert_eq!(decompiler.entry_count(), 0);
    }
}
