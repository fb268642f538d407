//! CLI command implementations

pub mod init;
pub mod migrate;
pub mod resume;
pub mod status;
pub mod validate;
