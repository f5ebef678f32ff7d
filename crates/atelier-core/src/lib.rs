//! atelier-core — task model, wire format, configuration, and error types.
//! All other Atelier crates depend on this one. Nothing in here does I/O
//! beyond reading and writing the config file.

pub mod config;
pub mod error;
pub mod params;
pub mod task;
pub mod wire;

pub use error::{ApiError, TrackError, TransitionError, TransportError, ValidationError};
pub use params::{GenerationParams, TaskType};
pub use task::{ImageRef, Task, TaskFailure, TaskId, TaskResult, TaskStatus, TaskUpdate};
