//! SD-008: Error taxonomy.
//!
//! Configuration errors abort generation before anything is registered.
//! Recipe and install errors are raised from inside a single task body and
//! never affect registration of other tasks.

use std::error::Error as StdError;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors raised while reading or resolving a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("'{name}' is a reserved task name (used as {kind})")]
    ReservedName { name: String, kind: &'static str },

    #[error("unit '{unit}' targets unknown range '{range}' (known ranges: {known})")]
    UnknownRange {
        unit: String,
        range: String,
        known: String,
    },

    #[error("malformed {what} \"{spec}\" in unit '{unit}': {reason}")]
    MalformedSpec {
        unit: String,
        what: &'static str,
        spec: String,
        reason: &'static str,
    },

    #[error("dependency-only tasks form a cycle: {0}")]
    DependencyCycle(String),

    #[error("invalid plugin pattern \"{pattern}\"")]
    PluginPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("TOML parse error")]
    Toml(#[from] toml::de::Error),
}

/// Failures of a single recipe, surfaced when its task runs.
#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("no such recipe \"{recipe}\" found in recipe directory \"{dir}\" {{{}}}", .path.display())]
    NotFound {
        recipe: String,
        dir: String,
        path: PathBuf,
    },

    #[error("recipe \"{recipe}\" has a syntax/load error ({})", .path.display())]
    Load {
        recipe: String,
        path: PathBuf,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("recipe \"{recipe}\": unresolved template {message}")]
    Template { recipe: String, message: String },

    #[error("failed to spawn script for task '{task}'")]
    Spawn {
        task: String,
        #[source]
        source: std::io::Error,
    },

    #[error("script for task '{task}' exited with status {code}")]
    Script { task: String, code: i32 },

    #[error("task '{task}' failed: {message}")]
    Failed { task: String, message: String },
}

/// Failures of the dependency-completeness check.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to scan recipe directory {}", .dir.display())]
    Scan {
        dir: PathBuf,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to read recipe manifest {}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("failed to install packages: {packages}: {message}")]
    Install { packages: String, message: String },
}

/// Errors produced by a task body.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Recipe(#[from] RecipeError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error("task '{0}' is not part of the resolved graph")]
    Unresolved(String),
}

/// Errors raised by the in-process runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("task '{0}' is not registered")]
    UnknownTask(String),

    #[error("task '{task}' depends on unregistered task '{dep}'")]
    UnknownDependency { task: String, dep: String },

    #[error("dependency cycle detected involving: {0}")]
    Cycle(String),

    #[error("{} task(s) failed: {}", .0.len(), .0.join(", "))]
    Failed(Vec<String>),
}

/// Render an error and all of its causes, outermost first.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\n\ncaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
