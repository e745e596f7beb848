use super::types::{Artifact, ImageProcessor, ProcessorError};
use crate::task::Task;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Ordered chain of image processors.
///
/// Each captured frame is seeded into an [`Artifact`] and passed through
/// every processor in order. A processor error aborts the chain and fails
/// the frame; a partially processed frame is never uploaded.
#[derive(Clone, Default)]
pub struct ProcessorChain {
    processors: Vec<Arc<dyn ImageProcessor>>,
}

impl ProcessorChain {
    pub fn new(processors: Vec<Arc<dyn ImageProcessor>>) -> Self {
        Self { processors }
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Runs every frame of a task through the full chain.
    pub async fn process_frames(
        &self,
        task: &Task,
        frames: Vec<PathBuf>,
    ) -> Result<Vec<Artifact>, ProcessorError> {
        let start = Instant::now();
        let mut artifacts = Vec::with_capacity(frames.len());

        for frame in frames {
            let mut artifact = Artifact::new(task.id.clone(), frame);
            for processor in &self.processors {
                let step = Instant::now();
                artifact = match processor.process(task, artifact).await {
                    Ok(a) => {
                        debug!(
                            task_id = %task.id,
                            processor = processor.name(),
                            elapsed_ms = step.elapsed().as_millis() as u64,
                            "Processor step complete"
                        );
                        a
                    }
                    Err(e) => {
                        error!(
                            task_id = %task.id,
                            processor = processor.name(),
                            error = %e,
                            "Processor step failed"
                        );
                        return Err(e);
                    }
                };
            }
            artifacts.push(artifact);
        }

        debug!(
            task_id = %task.id,
            artifacts = artifacts.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Processing complete"
        );
        Ok(artifacts)
    }
}

/// Built-in processor that stamps basic frame facts into the metadata.
pub struct FrameMetadataProcessor;

#[async_trait::async_trait]
impl ImageProcessor for FrameMetadataProcessor {
    fn name(&self) -> &str {
        "frame_metadata"
    }

    async fn process(
        &self,
        _task: &Task,
        mut artifact: Artifact,
    ) -> Result<Artifact, ProcessorError> {
        let meta = tokio::fs::metadata(&artifact.primary).await?;
        artifact
            .metadata
            .insert("frame_size_bytes".to_string(), json!(meta.len()));
        artifact.metadata.insert(
            "frame_name".to_string(),
            json!(artifact
                .primary
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()),
        );
        Ok(artifact)
    }
}
