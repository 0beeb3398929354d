//! Per-job scratch directory management.
//!
//! A [`JobWorkspace`] owns the temporary directory a single job attempt
//! writes into. The directory is created lazily on first use and removed
//! exactly once: by [`JobWorkspace::close`] on the normal path, or by `Drop`
//! when the owning task is aborted.

use std::path::{Path, PathBuf};

use mf_core::{Error, JobId};
use parking_lot::Mutex;
use tempfile::TempDir;

enum DirState {
    Pending,
    Open(TempDir),
    Closed,
}

/// Lazily created, exclusively owned scratch directory.
///
/// # Example
///
/// ```no_run
/// use mf_av::JobWorkspace;
/// use mf_core::JobId;
///
/// let ws = JobWorkspace::new(std::env::temp_dir(), JobId::new());
/// let input = ws.write("input.pdf", b"%PDF-1.7").unwrap();
/// // ... hand `input` to an engine ...
/// ws.close().unwrap();
/// assert!(!input.exists());
/// ```
pub struct JobWorkspace {
    root: PathBuf,
    job_id: JobId,
    state: Mutex<DirState>,
}

impl JobWorkspace {
    /// Prepare a workspace under `root`. Nothing is created yet.
    pub fn new(root: impl Into<PathBuf>, job_id: JobId) -> Self {
        Self {
            root: root.into(),
            job_id,
            state: Mutex::new(DirState::Pending),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Whether the directory currently exists on disk.
    pub fn is_created(&self) -> bool {
        matches!(*self.state.lock(), DirState::Open(_))
    }

    /// Path of the scratch directory, creating it on first call.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Internal`] once the workspace has been closed, and
    /// with [`Error::Io`] if the directory cannot be created.
    pub fn dir(&self) -> mf_core::Result<PathBuf> {
        let mut state = self.state.lock();
        match &*state {
            DirState::Open(dir) => Ok(dir.path().to_path_buf()),
            DirState::Closed => Err(Error::Internal(format!(
                "workspace for job {} already closed",
                self.job_id
            ))),
            DirState::Pending => {
                std::fs::create_dir_all(&self.root)?;
                let dir = tempfile::Builder::new()
                    .prefix(&format!("mf-{}-", self.job_id))
                    .tempdir_in(&self.root)?;
                let path = dir.path().to_path_buf();
                tracing::debug!(job_id = %self.job_id, "Created workspace {}", path.display());
                *state = DirState::Open(dir);
                Ok(path)
            }
        }
    }

    /// Path for a file named `name` inside the workspace.
    ///
    /// Names are chosen by the pipeline, never by callers; anything that is
    /// not a single plain path component is refused.
    pub fn file(&self, name: &str) -> mf_core::Result<PathBuf> {
        let plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0']);
        if !plain {
            return Err(Error::Internal(format!("invalid workspace file name {name:?}")));
        }
        Ok(self.dir()?.join(name))
    }

    /// Write `contents` to a new workspace file and return its path.
    pub fn write(&self, name: &str, contents: impl AsRef<[u8]>) -> mf_core::Result<PathBuf> {
        let path = self.file(name)?;
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Files currently in the workspace, sorted by name.
    pub fn list(&self) -> Vec<PathBuf> {
        let state = self.state.lock();
        let DirState::Open(dir) = &*state else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir.path())
            .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    /// Remove the directory and everything in it. Idempotent.
    pub fn close(&self) -> mf_core::Result<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), DirState::Closed);
        if let DirState::Open(dir) = previous {
            let path = dir.path().to_path_buf();
            dir.close()?;
            tracing::debug!(job_id = %self.job_id, "Removed workspace {}", path.display());
        }
        Ok(())
    }

    /// Parent directory under which workspaces are created.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if let DirState::Open(_) = &*self.state.get_mut() {
            tracing::debug!(job_id = %self.job_id, "Workspace dropped without close; removing");
        }
        // TempDir's own Drop removes the directory.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_lazily() {
        let root = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::new(root.path(), JobId::new());
        assert!(!ws.is_created());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);

        let dir = ws.dir().unwrap();
        assert!(ws.is_created());
        assert!(dir.starts_with(root.path()));
        assert!(dir.is_dir());
    }

    #[test]
    fn close_removes_everything_once() {
        let root = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::new(root.path(), JobId::new());
        let file = ws.write("page-0001.png", b"partial").unwrap();
        assert!(file.exists());

        ws.close().unwrap();
        assert!(!file.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);

        // Second close is a no-op, and the workspace cannot be reopened.
        ws.close().unwrap();
        assert!(ws.dir().is_err());
    }

    #[test]
    fn drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = {
            let ws = JobWorkspace::new(root.path(), JobId::new());
            ws.write("input.pdf", b"x").unwrap();
            ws.dir().unwrap()
        };
        assert!(!dir.exists());
    }

    #[test]
    fn close_without_use_creates_nothing() {
        let root = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::new(root.path(), JobId::new());
        ws.close().unwrap();
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn rejects_path_components() {
        let root = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::new(root.path(), JobId::new());
        assert!(ws.file("../escape").is_err());
        assert!(ws.file("a/b").is_err());
        assert!(ws.file("..").is_err());
        assert!(ws.file("").is_err());
        assert!(ws.file("text-0.txt").is_ok());
    }

    #[test]
    fn list_is_sorted() {
        let root = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::new(root.path(), JobId::new());
        assert!(ws.list().is_empty());
        ws.write("b.png", b"b").unwrap();
        ws.write("a.png", b"a").unwrap();
        let names: Vec<_> = ws
            .list()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }
}
