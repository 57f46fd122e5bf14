//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - JSON-lines workspace over stdin/stdout

pub mod exit_codes;
pub mod pipe;

pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
pub use pipe::{JsonLineWorkspace, StdinLineReader, WorkspaceLine};
