pub mod config;
pub mod error;
pub mod controller;
pub mod session;
pub mod args;
pub mod command;

pub use config::{load_config, ConfigError, RigConfig};
pub use controller::{Controller, RunControl, RunMode, RunOptions, RunState, RunSummary};
pub use error::{ErrorKind, RunError};
pub use session::Session;
