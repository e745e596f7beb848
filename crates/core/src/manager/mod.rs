mod board;
mod runner;

pub use board::{Admission, BoardError, StageCounts, TaskBoard, TaskOutcome};
pub use runner::{QueueDepths, TaskManager};
