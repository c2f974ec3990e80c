// lepasserelle - Bridge & Integration
//
// *La Passerelle* (The Bridge) - configuration, logging, error reporting and
// the command-line surface that tie the LeDeploy crates together

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Command-line interface
pub mod cli;
/// Host configuration file
pub mod config;
/// Top-level error taxonomy and the fatal report
pub mod errors;
/// Orchestration façade over the LeDeploy crates
pub mod ledeploy;
/// Log sinks and line format
pub mod logging;

pub use config::{ConfigError, DeployConfig};
pub use errors::{format_error, DeployError, ErrorKind, Result};
pub use ledeploy::{DeployTarget, LeDeploy};
pub use logging::{init_logging, LogConfig, LogHandle};
