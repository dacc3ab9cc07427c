//! Structural patching and build-repair loop for Go sources.
//!
//! - **[`core`]**: Pure logic. Parsing Go into declarations, merging patches,
//!   rendering, and reading toolchain diagnostics. No I/O.
//! - **[`io`]**: Side effects. Files, subprocesses, the oracle, prompts and config.
//!
//! [`controller`] drives one file through its step plan; [`session`] repeats that
//! for every incoming request.

pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
