//! SD-001: Configuration schema and resolved task graph types.
//!
//! Defines the soda.yaml schema (units, ranges, options, aliases, plugin
//! settings) and the graph produced by the resolver. Config types derive
//! Serialize/Deserialize so the same schema loads from YAML or TOML.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Directory, relative to the project root, holding source units.
pub const DEFAULT_SRC_DIR: &str = "lib";

/// Directory, relative to the project root, receiving build output.
pub const DEFAULT_DEST_DIR: &str = "dist";

/// Directory, relative to the project root, holding recipe manifests.
pub const DEFAULT_RECIPE_DIR: &str = "gulp";

/// Task name reserved for the dependency-completeness check.
pub const RESERVED_TASK: &str = "install";

/// Process-wide task depending on every unit.
pub const ROOT_TASK: &str = "default";

/// Options key applied to every task.
pub const WILDCARD_OPTIONS: &str = "*";

/// Free-form option values attached to a task.
pub type Options = IndexMap<String, serde_yaml_ng::Value>;

// ============================================================================
// Top-level soda.yaml
// ============================================================================

/// Root configuration, the declarative description of the task graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SodaConfig {
    /// Plugin discovery settings
    #[serde(default)]
    pub plugins: PluginOptions,

    /// Recipe directory, relative to the project root
    #[serde(default)]
    pub recipes: Option<String>,

    /// Global values exposed to every recipe
    #[serde(default)]
    pub config: Options,

    /// Units: source subdirectory → one or more targets
    #[serde(default, alias = "domain")]
    pub inputs: IndexMap<String, TargetSpec>,

    /// Ranges: range name → ordered recipe invocations
    #[serde(default, alias = "range")]
    pub targets: IndexMap<String, Vec<String>>,

    /// Source root
    #[serde(default)]
    pub src: Option<String>,

    /// Destination root
    #[serde(default)]
    pub dest: Option<String>,

    /// Option layers keyed by `*`, recipe name, or task id
    #[serde(default)]
    pub options: IndexMap<String, Options>,

    /// User-declared aliases: name → task ids
    #[serde(default)]
    pub aliases: IndexMap<String, Vec<String>>,
}

impl SodaConfig {
    pub fn src_dir(&self) -> &str {
        self.src.as_deref().unwrap_or(DEFAULT_SRC_DIR)
    }

    pub fn dest_dir(&self) -> &str {
        self.dest.as_deref().unwrap_or(DEFAULT_DEST_DIR)
    }

    pub fn recipe_dir(&self) -> &str {
        self.recipes.as_deref().unwrap_or(DEFAULT_RECIPE_DIR)
    }
}

/// A unit's targets: a single spec string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetSpec {
    Single(String),
    Multiple(Vec<String>),
}

impl TargetSpec {
    pub fn to_vec(&self) -> Vec<&str> {
        match self {
            TargetSpec::Single(s) => vec![s.as_str()],
            TargetSpec::Multiple(v) => v.iter().map(String::as_str).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TargetSpec::Single(_) => 1,
            TargetSpec::Multiple(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Plugins
// ============================================================================

/// Which dev-dependencies count as plugins and how they are keyed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginOptions {
    /// Regex over package names (default `^(gulp|vinyl)-`)
    #[serde(default)]
    pub pattern: Option<String>,

    /// Package name → plugin key transform
    #[serde(default)]
    pub transform: PluginTransform,
}

/// Transform applied to a plugin's package name to obtain its lookup key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginTransform {
    /// Drop the leading `word-` prefix, then hyphens → underscores
    #[default]
    StripPrefix,
    /// Hyphens → underscores only
    Snake,
    /// Package name unchanged
    Verbatim,
}

// ============================================================================
// Invocation grammar
// ============================================================================

/// A parsed target spec: `<range>[: <dest>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub range: String,
    pub dest: Option<String>,
}

/// A parsed recipe invocation: `<recipe>|[<recipe>][: <dep>...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub recipe: String,
    pub dependency_only: bool,
    pub deps: Vec<String>,
}

// ============================================================================
// Resolved graph
// ============================================================================

/// Whether a resolved task runs a recipe or only groups dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Recipe,
    DependencyOnly,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Recipe => write!(f, "recipe"),
            TaskKind::DependencyOnly => write!(f, "dependency-only"),
        }
    }
}

/// Everything known about one recipe invocation after resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskInfo {
    pub id: String,
    pub unit: String,
    pub range: String,
    pub recipe: String,
    pub kind: TaskKind,
    /// `-{range}` when the unit has several targets, empty otherwise
    pub suffix: String,
    /// Unit source directory
    pub src_dir: PathBuf,
    /// Unit source directory joined with the `src` option
    pub src: PathBuf,
    /// Destination root for this target (override or global)
    pub dest_root: PathBuf,
    pub dest: PathBuf,
    pub deps: Vec<String>,
    pub options: Options,
}

impl TaskInfo {
    pub fn is_dependency_only(&self) -> bool {
        self.kind == TaskKind::DependencyOnly
    }
}

/// Output of resolution: the complete task graph.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedGraph {
    /// Concrete tasks keyed by id, in declaration order
    pub tasks: IndexMap<String, TaskInfo>,
    /// Umbrella tasks over same-named tasks across targets (2+ members)
    pub groups: IndexMap<String, Vec<String>>,
    /// Per-unit default task dependencies
    pub defaults: IndexMap<String, Vec<String>>,
    /// Executable task ids per recipe name
    pub recipe_tasks: IndexMap<String, Vec<String>>,
}

impl ResolvedGraph {
    pub fn task(&self, id: &str) -> Option<&TaskInfo> {
        self.tasks.get(id)
    }
}

/// Convert a YAML value to its plain string form (scalars unquoted).
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => serde_yaml_ng::to_string(other)
            .unwrap_or_default()
            .trim()
            .to_string(),
    }
}
