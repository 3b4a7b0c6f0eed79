//! Adapters for the domain's outbound ports.

pub mod memory;
pub mod routing;
