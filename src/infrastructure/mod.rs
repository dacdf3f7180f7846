//! Infrastructure layer module
//!
//! Ambient concerns shared by the library and the `weft` binary:
//! - Configuration management
//! - Logging infrastructure

pub mod config;
pub mod logging;
