//! REST API modules.

pub mod error;
pub mod health;
pub mod rides;

pub use error::{ApiError, ApiResult};
