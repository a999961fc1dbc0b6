use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::warn;

use super::state::JobId;
use crate::media::{MediaRole, OutputFormat};

/// Per-job directory under the work root. Every input and the staged output
/// live inside it, so cleanup is one recursive removal.
#[derive(Debug, Clone)]
pub struct JobWorkspace {
    root: PathBuf,
}

impl JobWorkspace {
    pub async fn create(work_dir: &Path, job_id: &JobId) -> io::Result<Self> {
        let root = work_dir.join(job_id.as_str());
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_path(&self, role: MediaRole) -> PathBuf {
        self.root.join(role.staging_file_name())
    }

    pub fn staged_output(&self, format: OutputFormat) -> PathBuf {
        self.root.join(format!("output.{}", format.extension()))
    }

    /// Removes the whole directory. Failures are logged, never raised, so a
    /// cleanup problem cannot mask the job's own outcome.
    pub async fn cleanup(self) -> bool {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!(path = %self.root.display(), error = %err, "failed to clean job workspace");
                false
            }
        }
    }
}
