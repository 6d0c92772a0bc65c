//! Shared building blocks: tracing setup and identifier generation.

pub mod id;
pub mod tracing;

pub use crate::id::{SHORT_ID_LEN, random_id, short_id};
pub use crate::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
