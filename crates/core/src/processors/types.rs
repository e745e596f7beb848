use crate::task::Task;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor '{processor}' failed: {message}")]
    Failed { processor: String, message: String },

    #[error("frame unreadable: {0}")]
    Io(#[from] std::io::Error),
}

/// A processed observation ready for upload.
///
/// `primary` is the frame the backend receives; `extras` are auxiliary
/// files produced during processing (plots, solved headers). `metadata`
/// accumulates across the processor chain.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub task_id: String,
    pub primary: PathBuf,
    pub extras: Vec<PathBuf>,
    pub metadata: BTreeMap<String, Value>,
}

impl Artifact {
    pub fn new(task_id: impl Into<String>, primary: PathBuf) -> Self {
        Self {
            task_id: task_id.into(),
            primary,
            extras: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Every file belonging to this artifact: the primary frame first,
    /// then any extras.
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.primary).chain(self.extras.iter())
    }
}

/// A single step in the processing chain.
///
/// Processors receive the artifact built so far and the task it belongs
/// to, and may rewrite the primary frame, attach extras or add metadata.
/// Implementations must be stateless; the chain may be shared across
/// concurrent tasks.
#[async_trait]
pub trait ImageProcessor: Send + Sync {
    /// Short identifier used in logs and metadata keys.
    fn name(&self) -> &str;

    async fn process(&self, task: &Task, artifact: Artifact) -> Result<Artifact, ProcessorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_yields_primary_then_extras() {
        let mut artifact = Artifact::new("t-1", PathBuf::from("/tmp/frame.fits"));
        artifact.extras.push(PathBuf::from("/tmp/plot.png"));
        artifact.extras.push(PathBuf::from("/tmp/frame.wcs"));

        let files: Vec<&PathBuf> = artifact.files().collect();
        assert_eq!(
            files,
            vec![
                &PathBuf::from("/tmp/frame.fits"),
                &PathBuf::from("/tmp/plot.png"),
                &PathBuf::from("/tmp/frame.wcs"),
            ]
        );
    }

    #[test]
    fn test_files_without_extras() {
        let artifact = Artifact::new("t-1", PathBuf::from("/tmp/frame.fits"));
        assert_eq!(artifact.files().count(), 1);
    }
}
