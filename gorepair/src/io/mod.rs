//! Side-effecting collaborators: files, subprocesses, the oracle and config.

pub mod attempt_log;
pub mod config;
pub mod files;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod toolchain;
