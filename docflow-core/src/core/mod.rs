//! Core error handling shared by every docflow subsystem.

pub mod error;

pub use error::{DocflowError, Result};
