mod http;
mod types;

pub use http::HttpTaskBackend;
pub use types::{BackendError, TaskBackend};
