//! Data structures flowing through the capture pipeline

mod format;
mod metadata;
mod samples;

pub use format::*;
pub use metadata::*;
pub use samples::*;
