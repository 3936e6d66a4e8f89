//! Soda: declarative build-task graph generator.
//!
//! Units of source files, ranges of recipe invocations, and per-task
//! options resolve into a graph of named tasks. The graph is registered
//! with a task runner; recipes are loaded by name only when their task runs.

pub mod cli;
pub mod core;
pub mod transport;
