//! Mock image processors for testing.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::processors::{Artifact, ImageProcessor, ProcessorError};
use crate::task::Task;

/// Processor that records its invocations and stamps its name into the
/// artifact metadata, so tests can assert chain ordering.
pub struct RecordingProcessor {
    name: String,
    calls: AtomicU32,
}

impl RecordingProcessor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProcessor for RecordingProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _task: &Task, mut artifact: Artifact) -> Result<Artifact, ProcessorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        artifact.metadata.insert(self.name.clone(), json!(call));
        Ok(artifact)
    }
}

/// Processor that always fails.
pub struct FailingProcessor {
    name: String,
}

impl FailingProcessor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ImageProcessor for FailingProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _task: &Task, _artifact: Artifact) -> Result<Artifact, ProcessorError> {
        Err(ProcessorError::Failed {
            processor: self.name.clone(),
            message: "mock processor failure".to_string(),
        })
    }
}
