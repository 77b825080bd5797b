//! File-key resolution for component configuration
//!
//! Before any component opens, the engine passes each configuration through
//! a [`ConfigResolver`]. The local implementation understands three keys:
//!
//! - `file_id`: replaced by `file_path`, the absolute path of a stored input
//! - `file_ids`: comma-separated ids, replaced by comma-separated `file_paths`
//! - `file_name` (+ optional `file_ext`): allocates a new output file and sets
//!   `file_path` to where the component should write it
//!
//! Output files are settled by [`ConfigResolver::finish`] once the run ends.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sluice_common::ComponentConfig;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pipeline::RunId;

/// Identifier of a stored file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rewrites configuration keys that refer to stored files
#[async_trait]
pub trait ConfigResolver: Send + Sync {
    /// Resolve file keys in place. Returns the id of an output file created
    /// for this configuration, if any.
    async fn resolve(&self, config: &mut ComponentConfig) -> Result<Option<FileId>>;

    /// Settle output files created during a run
    async fn finish(&self, run_id: &RunId, created: &[FileId], failed: bool) -> Result<()>;
}

/// Resolver that leaves configuration untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

#[async_trait]
impl ConfigResolver for NoopResolver {
    async fn resolve(&self, _config: &mut ComponentConfig) -> Result<Option<FileId>> {
        Ok(None)
    }

    async fn finish(&self, _run_id: &RunId, _created: &[FileId], _failed: bool) -> Result<()> {
        Ok(())
    }
}

/// Metadata kept next to every output file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFileMeta {
    pub id: FileId,
    pub name: String,
    pub ext: String,
    pub size: u64,
    pub run_id: Option<String>,
}

const META_SUFFIX: &str = ".meta.json";

/// File store rooted at a local directory
///
/// Inputs live in `<root>/input/<id><ext>`, outputs in
/// `<root>/output/<id><ext>` with a `<id>.meta.json` sidecar.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    fn meta_path(&self, id: &FileId) -> PathBuf {
        self.output_dir().join(format!("{}{}", id, META_SUFFIX))
    }

    /// Absolute path of the stored input file with this id
    pub async fn input_path(&self, id: &str) -> Result<PathBuf> {
        let id = id.trim();
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            bail!("invalid file id '{}'", id);
        }

        let dir = self.input_dir();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("failed to list {}", dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(META_SUFFIX) {
                continue;
            }
            let stem = Path::new(name.as_ref())
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned());
            if name == id || stem.as_deref() == Some(id) {
                return tokio::fs::canonicalize(entry.path())
                    .await
                    .with_context(|| format!("failed to resolve path of file '{}'", id));
            }
        }

        Err(anyhow!("file record '{}' does not exist", id))
    }

    /// Allocate a new output file and record its metadata
    pub async fn create_output(&self, name: &str, ext: &str) -> Result<(FileId, PathBuf)> {
        let ext = normalize_ext(ext);
        let name = name.strip_suffix(ext.as_str()).unwrap_or(name).to_string();
        let id = FileId::new(Uuid::new_v4().to_string());

        let dir = self.output_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let dir = tokio::fs::canonicalize(&dir).await?;

        let meta = OutputFileMeta {
            id: id.clone(),
            name,
            ext: ext.clone(),
            size: 0,
            run_id: None,
        };
        self.write_meta(&meta).await?;

        Ok((id.clone(), dir.join(format!("{}{}", id, ext))))
    }

    pub async fn read_meta(&self, id: &FileId) -> Result<OutputFileMeta> {
        let path = self.meta_path(id);
        let raw = tokio::fs::read(&path)
            .await
            .with_context(|| format!("file record '{}' does not exist", id))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn write_meta(&self, meta: &OutputFileMeta) -> Result<()> {
        let path = self.meta_path(&meta.id);
        let body = serde_json::to_vec_pretty(meta)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }

    async fn settle(&self, run_id: &RunId, id: &FileId, failed: bool) -> Result<()> {
        let mut meta = self.read_meta(id).await?;
        let data_path = self.output_dir().join(format!("{}{}", id, meta.ext));

        if failed {
            remove_if_exists(&data_path).await?;
            remove_if_exists(&self.meta_path(id)).await?;
            info!(file_id = %id, "Removed output file of failed run");
            return Ok(());
        }

        match tokio::fs::metadata(&data_path).await {
            Ok(stat) => {
                meta.size = stat.len();
                meta.run_id = Some(run_id.to_string());
                self.write_meta(&meta).await?;
                debug!(file_id = %id, size = meta.size, "Recorded output file");
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(file_id = %id, "Output file was never written, dropping its record");
                remove_if_exists(&self.meta_path(id)).await?;
            },
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigResolver for LocalFileStore {
    async fn resolve(&self, config: &mut ComponentConfig) -> Result<Option<FileId>> {
        let mut created = None;

        if let Some(id) = config.get("file_id").map(str::to_string) {
            let path = self
                .input_path(&id)
                .await
                .context("file_id config is invalid")?;
            config.insert("file_path", path.to_string_lossy());
        }

        if let Some(ids) = config.get("file_ids").map(str::to_string) {
            let mut paths = Vec::new();
            for id in ids.split(',').map(str::trim).filter(|id| !id.is_empty()) {
                let path = self
                    .input_path(id)
                    .await
                    .context("file_ids config is invalid")?;
                paths.push(path.to_string_lossy().into_owned());
            }
            if paths.is_empty() {
                bail!("file_ids config is invalid: no ids given");
            }
            config.insert("file_paths", paths.join(","));
        }

        if let Some(name) = config.get("file_name").map(str::to_string) {
            let ext = config.get("file_ext").unwrap_or_default().to_string();
            let (id, path) = self
                .create_output(&name, &ext)
                .await
                .context("file_name config is invalid")?;
            config.insert("file_path", path.to_string_lossy());
            created = Some(id);
        }

        Ok(created)
    }

    async fn finish(&self, run_id: &RunId, created: &[FileId], failed: bool) -> Result<()> {
        let mut failures = Vec::new();
        for id in created {
            if let Err(e) = self.settle(run_id, id, failed).await {
                warn!(file_id = %id, error = %e, "Failed to settle output file");
                failures.push(format!("{}: {:#}", id, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(failures.join("; ")))
        }
    }
}

fn normalize_ext(ext: &str) -> String {
    let ext = ext.trim();
    if ext.is_empty() || ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{}", ext)
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
    }
}
