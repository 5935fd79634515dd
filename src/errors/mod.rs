pub mod types;

pub use types::{AppError, AuthError, PipelineError, QueueError, StorageError};
