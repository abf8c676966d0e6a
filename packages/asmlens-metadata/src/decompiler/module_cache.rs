use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use crate::error::Result;
use crate::reader::ModuleReader;

pub const DEFAULT_MODULE_BUDGET_BYTES: u64 = 256 * 1024 * 1024;
pub const DEFAULT_MODULE_IDLE: Duration = Duration::from_secs(30 * 60);

/// Opened modules shared by every decompilation request.
///
/// Readers hold the image in memory, so entries never pin the file on disk.
/// Entries are weighed by image size against a byte budget and dropped after
/// sitting idle.
pub struct ModuleCache {
    modules: Cache<PathBuf, Arc<ModuleReader>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MODULE_BUDGET_BYTES, DEFAULT_MODULE_IDLE)
    }

    pub fn with_limits(budget_bytes: u64, idle: Duration) -> Self {
        let modules = Cache::builder()
            .max_capacity(budget_bytes)
            .weigher(|_path: &PathBuf, reader: &Arc<ModuleReader>| {
                u32::try_from(reader.as_bytes().len()).unwrap_or(u32::MAX)
            })
            .time_to_idle(idle)
            .eviction_listener(|path: Arc<PathBuf>, _reader, cause| {
                tracing::debug!(path = %path.display(), ?cause, "module evicted");
            })
            .build();
        Self { modules }
    }

    pub fn get_or_open(&self, path: &Path) -> Result<Arc<ModuleReader>> {
        if let Some(reader) = self.modules.get(path) {
            return Ok(reader);
        }

        // Parse outside the cache; a racing opener wins harmlessly.
        let reader = Arc::new(ModuleReader::open(path)?);
        let shared = self
            .modules
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::clone(&reader))
            .into_value();
        tracing::debug!(path = %path.display(), "opened module");
        Ok(shared)
    }

    pub fn evict(&self, path: &Path) -> bool {
        self.modules.remove(path).is_some()
    }

    pub fn clear(&self) {
        self.modules.invalidate_all();
        self.modules.run_pending_tasks();
    }

    pub fn len(&self) -> usize {
        self.modules.run_pending_tasks();
        self.modules.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently charged against the budget
    pub fn weighted_size(&self) -> u64 {
        self.modules.run_pending_tasks();
        self.modules.weighted_size()
    }
}

impl Default for ModuleCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache")
            .field("entries", &self.modules.entry_count())
            .field("weighted_size", &self.modules.weighted_size())
            .finish()
    }
}
