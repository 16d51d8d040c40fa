use std::io;
use std::path::{Path, PathBuf};

/// ArtifactStore hands out paths for materialized query results.
/// Each Artifact has a unique path, so that overlapping invocations
/// within a process never read or remove one another's results.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Allocate a new Artifact. Its file is not created until the
    /// engine materializes results into it.
    pub fn allocate(&self) -> Artifact {
        let path = self
            .dir
            .join(format!("sql-object-lambda-{}.csv", uuid::Uuid::new_v4()));

        Artifact {
            path,
            removed: false,
        }
    }
}

/// Artifact is an ephemeral file of materialized query results.
/// Its file is removed when the Artifact is dropped, if it wasn't already
/// removed through `remove()`.
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
    removed: bool,
}

/// ArtifactBody is an open handle to an Artifact's file, to be streamed.
/// The file is closed when the body is dropped.
#[derive(Debug)]
pub struct ArtifactBody {
    pub file: tokio::fs::File,
    pub len: u64,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn open(&self) -> io::Result<ArtifactBody> {
        let file = tokio::fs::File::open(&self.path).await?;
        let len = file.metadata().await?.len();

        Ok(ArtifactBody { file, len })
    }

    /// Remove the Artifact's file. It's not an error if the file never existed.
    pub async fn remove(mut self) -> io::Result<()> {
        self.removed = true;

        match tokio::fs::remove_file(&self.path).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                tracing::error!(%error, path=?self.path, "failed to remove dropped artifact");
            }
            _ => (),
        }
    }
}
