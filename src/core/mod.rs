//! Core logic: types, parsing, resolution, recipes, registration, execution.

pub mod error;
pub mod executor;
pub mod generator;
pub mod installer;
pub mod options;
pub mod parser;
pub mod plugins;
pub mod recipe;
pub mod registrar;
pub mod resolver;
pub mod types;
