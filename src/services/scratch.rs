use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::services::table::Table;

/// A CSV written to local disk for transfer, named exactly like the upload.
///
/// The file lives alone in a fresh temporary directory. Dropping the value
/// removes both, whichever path the owning routine leaves through.
#[derive(Debug)]
pub struct ScratchFile {
    dir: TempDir,
    path: PathBuf,
}

impl ScratchFile {
    pub async fn write(root: Option<&Path>, filename: &str, table: &Table) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("csv-stage-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .context("failed to create scratch directory")?;

        let path = dir.path().join(filename);
        let bytes = table.to_csv_bytes()?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write scratch file {}", path.display()))?;

        tracing::debug!("Wrote scratch file {}", path.display());
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}
