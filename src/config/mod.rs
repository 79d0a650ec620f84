//! Configuration: CLI arguments and optional TOML files

pub mod cli;
pub mod toml;

pub use self::cli::{Cli, ExecutionMode};
pub use self::toml::CoordinatorConfig;
