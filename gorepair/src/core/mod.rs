//! Deterministic, pure logic of the patch engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! source text and return deterministic outputs suitable for tests. The one
//! external seam, [`render::Formatter`], is a trait implemented in `io`.

pub mod errors;
pub mod failed_tests;
pub mod locator;
pub mod merge;
pub mod parser;
pub mod render;
pub mod response;
pub mod steps;
pub mod types;
pub mod unused_imports;
