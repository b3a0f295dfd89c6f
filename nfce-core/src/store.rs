//! Artifact persistence (request lots, raw responses, authorized documents).
//!
//! Saving is best-effort: the client logs failures and carries on, so an
//! unwritable directory never changes an authorization outcome.
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Xml,
    Json,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Xml => "xml",
            ArtifactKind::Json => "json",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid artifact name: {0:?}")]
    InvalidName(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub trait ArtifactStore: Send + Sync {
    /// Persist `content` as `{name}.{ext}` under the optional sub-directory.
    ///
    /// Returns the written path, or `None` when the store discards content.
    fn save(
        &self,
        content: &str,
        name: &str,
        kind: ArtifactKind,
        subdir: Option<&str>,
    ) -> Result<Option<PathBuf>, StoreError>;
}

/// Writes artifacts below a root directory, creating directories as needed.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn check_component(value: &str) -> Result<(), StoreError> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.contains('\0');
    if bad {
        return Err(StoreError::InvalidName(value.to_string()));
    }
    Ok(())
}

impl ArtifactStore for FsArtifactStore {
    fn save(
        &self,
        content: &str,
        name: &str,
        kind: ArtifactKind,
        subdir: Option<&str>,
    ) -> Result<Option<PathBuf>, StoreError> {
        check_component(name)?;
        let mut dir = self.root.clone();
        if let Some(subdir) = subdir {
            check_component(subdir)?;
            dir.push(subdir);
        }
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(format!("{name}.{}", kind.extension()));
        fs::write(&path, content).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Some(path))
    }
}

/// Discards every artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopArtifactStore;

impl ArtifactStore for NoopArtifactStore {
    fn save(
        &self,
        _content: &str,
        _name: &str,
        _kind: ArtifactKind,
        _subdir: Option<&str>,
    ) -> Result<Option<PathBuf>, StoreError> {
        Ok(None)
    }
}

pub(crate) fn save_best_effort(
    store: &dyn ArtifactStore,
    content: &str,
    name: &str,
    kind: ArtifactKind,
    subdir: Option<&str>,
) {
    if let Err(err) = store.save(content, name, kind, subdir) {
        warn!(artifact = name, error = %err, "failed to persist artifact");
    }
}
