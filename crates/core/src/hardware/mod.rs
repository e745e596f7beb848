mod sim;
mod types;

pub use sim::SimAdapter;
pub use types::{HardwareAdapter, HardwareError};
