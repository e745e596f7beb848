mod chain;
mod types;

pub use chain::{FrameMetadataProcessor, ProcessorChain};
pub use types::{Artifact, ImageProcessor, ProcessorError};
