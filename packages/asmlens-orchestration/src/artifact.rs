//! Per-analysis artifact directory.
//!
//! Layout: `<root>/<analysis_id>/module.{dll,exe}` plus one file per step.
//! Writes go to a temp file that is renamed over the target, so readers
//! never observe a half-written artifact.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{OrchestratorError, Result};

const MODULE_STEM: &str = "module";
const MODULE_EXTENSIONS: [&str; 2] = ["dll", "exe"];
const FORBIDDEN_ID_CHARS: [char; 4] = ['/', '\\', ':', '\0'];

/// Analysis ids become a single directory name under the storage root.
///
/// # Errors
/// - `InvalidAnalysisId` for empty ids, `.`/`..`, and ids with path separators
pub fn validate_analysis_id(analysis_id: &str) -> Result<()> {
    let reason = if analysis_id.is_empty() {
        "must not be empty"
    } else if analysis_id == "." || analysis_id == ".." {
        "must not be a relative path component"
    } else if analysis_id.contains(FORBIDDEN_ID_CHARS) {
        "must not contain path separators"
    } else {
        return Ok(());
    };
    Err(OrchestratorError::InvalidAnalysisId(format!(
        "{:?} {}",
        analysis_id, reason
    )))
}

/// Bounded retry with a fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds or attempts run out. `NotFound` is final.
    async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> std::io::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::io::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(e),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(e) => {
                    warn!(what, attempt, error = %e, "artifact I/O failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    retry: RetryPolicy,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_retry(root, RetryPolicy::default())
    }

    pub fn with_retry(root: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            root: root.into(),
            retry,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn analysis_dir(&self, analysis_id: &str) -> PathBuf {
        self.root.join(analysis_id)
    }

    /// `analysis_dir` for ids that passed [`validate_analysis_id`].
    fn checked_dir(&self, analysis_id: &str) -> Result<PathBuf> {
        validate_analysis_id(analysis_id)?;
        Ok(self.analysis_dir(analysis_id))
    }

    pub fn artifact_path(&self, analysis_id: &str, file_name: &str) -> PathBuf {
        self.analysis_dir(analysis_id).join(file_name)
    }

    /// Writes the uploaded module as `module.<ext>`, keeping `dll`/`exe`.
    pub async fn store_module(
        &self,
        analysis_id: &str,
        original_file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let ext = module_extension(original_file_name);
        let file_name = format!("{}.{}", MODULE_STEM, ext);
        self.save_bytes(analysis_id, bytes, &file_name).await
    }

    /// Serializes `value` as pretty JSON into `file_name`.
    pub async fn save<T: Serialize>(
        &self,
        analysis_id: &str,
        value: &T,
        file_name: &str,
    ) -> Result<PathBuf> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.save_bytes(analysis_id, &bytes, file_name).await
    }

    pub async fn save_bytes(
        &self,
        analysis_id: &str,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<PathBuf> {
        let dir = self.checked_dir(analysis_id)?;
        let target = dir.join(file_name);
        let temp = dir.join(format!(".{}.tmp", file_name));

        let (dir_ref, temp_ref, target_ref) = (&dir, &temp, &target);
        self.retry
            .run(file_name, || async move {
                tokio::fs::create_dir_all(dir_ref).await?;
                tokio::fs::write(temp_ref, bytes).await?;
                tokio::fs::rename(temp_ref, target_ref).await
            })
            .await?;

        debug!(analysis_id, file_name, bytes = bytes.len(), "artifact written");
        Ok(target)
    }

    /// # Errors
    /// - `ArtifactMissing` when the file does not exist
    pub async fn read<T: DeserializeOwned>(&self, analysis_id: &str, file_name: &str) -> Result<T> {
        let bytes = self.read_bytes(analysis_id, file_name).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// # Errors
    /// - `ArtifactMissing` when the file does not exist
    pub async fn read_bytes(&self, analysis_id: &str, file_name: &str) -> Result<Vec<u8>> {
        let path = self.checked_dir(analysis_id)?.join(file_name);
        let path = &path;
        self.retry
            .run(file_name, || tokio::fs::read(path))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => OrchestratorError::ArtifactMissing {
                    analysis_id: analysis_id.to_string(),
                    file_name: file_name.to_string(),
                },
                _ => OrchestratorError::Io(e),
            })
    }

    pub async fn artifact_exists(&self, analysis_id: &str, file_name: &str) -> bool {
        let Ok(dir) = self.checked_dir(analysis_id) else {
            return false;
        };
        tokio::fs::try_exists(dir.join(file_name))
            .await
            .unwrap_or(false)
    }

    /// The stored module, if any. A missing directory is `None`, not an error.
    pub async fn find_module_file(&self, analysis_id: &str) -> Option<PathBuf> {
        let dir = self.checked_dir(analysis_id).ok()?;
        let mut entries = tokio::fs::read_dir(dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_module = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| MODULE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_module && path.is_file() {
                return Some(path);
            }
        }
        None
    }

    /// Removes the analysis directory. Returns `false` when it was absent.
    pub async fn delete_analysis_dir(&self, analysis_id: &str) -> Result<bool> {
        match tokio::fs::remove_dir_all(self.checked_dir(analysis_id)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn module_extension(original_file_name: &str) -> &'static str {
    let lower = original_file_name.to_ascii_lowercase();
    if lower.ends_with(".exe") {
        "exe"
    } else {
        "dll"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    fn store(dir: &Path) -> ArtifactStore {
        ArtifactStore::with_retry(
            dir,
            RetryPolicy {
                attempts: 2,
                backoff: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn test_save_and_read_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let sample = Sample {
            name: "Acme".into(),
            count: 3,
        };

        let path = store.save("a-1", &sample, "statistics.json").await.unwrap();
        assert_eq!(path, dir.path().join("a-1").join("statistics.json"));
        assert!(store.artifact_exists("a-1", "statistics.json").await);

        let loaded: Sample = store.read("a-1", "statistics.json").await.unwrap();
        assert_eq!(loaded, sample);
    }

    #[tokio::test]
    async fn test_save_overwrites_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store.save_bytes("a-1", b"first", "analysis.zip").await.unwrap();
        store.save_bytes("a-1", b"second", "analysis.zip").await.unwrap();

        assert_eq!(store.read_bytes("a-1", "analysis.zip").await.unwrap(), b"second");
        let names: Vec<_> = std::fs::read_dir(dir.path().join("a-1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["analysis.zip".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let err = store.read_bytes("a-1", "metadata.json").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ArtifactMissing { .. }));
        assert!(!store.artifact_exists("a-1", "metadata.json").await);
    }

    #[tokio::test]
    async fn test_store_module_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let path = store.store_module("a-1", "Tool.EXE", b"MZ").await.unwrap();
        assert_eq!(path.file_name().unwrap(), "module.exe");
        let path = store.store_module("a-2", "Library", b"MZ").await.unwrap();
        assert_eq!(path.file_name().unwrap(), "module.dll");

        assert_eq!(store.find_module_file("a-1").await, Some(dir.path().join("a-1/module.exe")));
        assert_eq!(store.find_module_file("missing").await, None);
    }

    #[tokio::test]
    async fn test_find_module_ignores_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.save_bytes("a-1", b"{}", "metadata.json").await.unwrap();

        assert_eq!(store.find_module_file("a-1").await, None);
    }

    #[tokio::test]
    async fn test_delete_analysis_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.save_bytes("a-1", b"{}", "metadata.json").await.unwrap();

        assert!(store.delete_analysis_dir("a-1").await.unwrap());
        assert!(!store.analysis_dir("a-1").exists());
        assert!(!store.delete_analysis_dir("a-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_path_like_ids_never_touch_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("analyses");
        let store = store(&root);
        store.save_bytes("victim", b"{}", "metadata.json").await.unwrap();

        for id in ["", ".", "..", "../x", "a/b", "a\\b", "c:x"] {
            assert!(
                matches!(validate_analysis_id(id), Err(OrchestratorError::InvalidAnalysisId(_))),
                "{:?} accepted",
                id
            );
            assert!(store.save_bytes(id, b"MZ", "module.dll").await.is_err());
            assert!(store.read_bytes(id, "metadata.json").await.is_err());
            assert!(store.delete_analysis_dir(id).await.is_err());
            assert_eq!(store.find_module_file(id).await, None);
            assert!(!store.artifact_exists(id, "metadata.json").await);
        }

        assert!(store.artifact_exists("victim", "metadata.json").await);
        assert!(!dir.path().join("x").exists());
        assert!(validate_analysis_id("3f1c2a9e-analysis.v2").is_ok());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig {
            attempts: 0,
            backoff_ms: 50,
        });
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.backoff, Duration::from_millis(50));
    }
}
