//! Command-line interface

pub mod args;
pub mod runner;

pub use args::{Cli, Command};
pub use runner::Runner;
