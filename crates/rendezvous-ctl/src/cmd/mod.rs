//! CLI command modules.

pub mod claim;
pub mod http;
pub mod status;
