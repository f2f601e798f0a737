//! CLI command modules.

pub mod call;
pub mod http;
pub mod status;
pub mod tunnel;
