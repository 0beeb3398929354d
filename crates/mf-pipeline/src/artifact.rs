//! Files passed between stages.

use std::path::{Path, PathBuf};

use mf_core::MediaFormat;

/// One file in the job workspace, as produced by a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageArtifact {
    pub path: PathBuf,
    pub format: MediaFormat,
    /// Zero-based document page this artifact belongs to.
    pub page: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl StageArtifact {
    pub fn new(path: impl Into<PathBuf>, format: MediaFormat) -> Self {
        Self {
            path: path.into(),
            format,
            page: None,
            width: None,
            height: None,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_dimensions(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name within the workspace.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
