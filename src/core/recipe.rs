//! SD-005: Recipe contract, lazy loading, and script recipes.
//!
//! A recipe is the transformation behind a task. Recipes are resolved by
//! name only when their task runs: builtin recipes registered on the
//! loader win, otherwise `<recipe_dir>/<name>.yaml` is read as a recipe
//! manifest. A manifest declares the packages the recipe needs and a bash
//! script template:
//!
//! ```yaml
//! recipe:
//!   description: copy static files
//!   dependencies: [gulp-rename]
//! script: |
//!   mkdir -p "{{dest}}"
//!   cp -r {{src}} "{{dest}}"
//! ```

use super::error::RecipeError;
use super::plugins::PluginMap;
use super::types::{yaml_value_to_string, Options, ResolvedGraph, TaskInfo};
use crate::transport::local;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::Arc;
use std::thread::JoinHandle;

// ============================================================================
// Recipe contract
// ============================================================================

/// A build transformation bound to tasks by name.
pub trait Recipe: Send + Sync {
    /// Packages (`name` or `name@range`) the recipe expects among the
    /// project's dev-dependencies.
    fn dependencies(&self) -> &[String] {
        &[]
    }

    /// Run the recipe for one task.
    fn run(&self, ctx: &TaskContext, plugins: &PluginMap) -> Result<Completion, RecipeError>;
}

/// How a recipe finishes.
pub enum Completion {
    /// All work happened inside `run`.
    Done,
    /// Work continues in the background; the runner waits on the handle.
    Pending(Box<dyn PendingTask>),
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Done => write!(f, "Completion::Done"),
            Completion::Pending(_) => write!(f, "Completion::Pending(*)"),
        }
    }
}

/// Background work started by a recipe.
pub trait PendingTask: Send {
    fn wait(self: Box<Self>) -> Result<(), RecipeError>;
}

impl PendingTask for JoinHandle<Result<(), RecipeError>> {
    fn wait(self: Box<Self>) -> Result<(), RecipeError> {
        (*self).join().unwrap_or_else(|_| {
            Err(RecipeError::Failed {
                task: "<thread>".to_string(),
                message: "recipe thread panicked".to_string(),
            })
        })
    }
}

/// A running script, awaited by exit status.
pub struct ScriptProcess {
    pub task: String,
    pub child: Child,
}

impl PendingTask for ScriptProcess {
    fn wait(mut self: Box<Self>) -> Result<(), RecipeError> {
        let status = self.child.wait().map_err(|source| RecipeError::Spawn {
            task: self.task.clone(),
            source,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(RecipeError::Script {
                task: self.task.clone(),
                code: status.code().unwrap_or(-1),
            })
        }
    }
}

// ============================================================================
// Task context
// ============================================================================

/// Everything a recipe may know about the task it runs for.
#[derive(Debug, Clone)]
pub struct TaskContext {
    info: TaskInfo,
    config: Arc<Options>,
    graph: Arc<ResolvedGraph>,
}

impl TaskContext {
    pub fn new(info: TaskInfo, config: Arc<Options>, graph: Arc<ResolvedGraph>) -> Self {
        Self {
            info,
            config,
            graph,
        }
    }

    pub fn task(&self) -> &str {
        &self.info.id
    }

    pub fn recipe(&self) -> &str {
        &self.info.recipe
    }

    pub fn unit(&self) -> &str {
        &self.info.unit
    }

    /// Unit source directory, before the `src` option is applied.
    pub fn src_dir(&self) -> &Path {
        &self.info.src_dir
    }

    pub fn src(&self) -> &Path {
        &self.info.src
    }

    pub fn dest(&self) -> &Path {
        &self.info.dest
    }

    pub fn deps(&self) -> &[String] {
        &self.info.deps
    }

    pub fn options(&self) -> &Options {
        &self.info.options
    }

    /// Global `config` values.
    pub fn config(&self) -> &Options {
        &self.config
    }

    /// A directory under this target's destination root.
    pub fn sub_dest(&self, dir: &str) -> PathBuf {
        self.info.dest_root.join(dir)
    }

    /// Id of the sibling task invoking `recipe` in the same unit and target.
    pub fn other(&self, recipe: &str) -> String {
        format!("{}-{}{}", recipe, self.info.unit, self.info.suffix)
    }

    /// Resolved info of any task.
    pub fn friend(&self, id: &str) -> Option<&TaskInfo> {
        self.graph.task(id)
    }
}

// ============================================================================
// Recipe kinds
// ============================================================================

type RecipeFn = dyn Fn(&TaskContext, &PluginMap) -> Result<Completion, RecipeError> + Send + Sync;

/// A recipe implemented by a Rust closure.
pub struct FnRecipe {
    dependencies: Vec<String>,
    func: Box<RecipeFn>,
}

impl FnRecipe {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&TaskContext, &PluginMap) -> Result<Completion, RecipeError> + Send + Sync + 'static,
    {
        Self {
            dependencies: Vec::new(),
            func: Box::new(func),
        }
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }
}

impl Recipe for FnRecipe {
    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn run(&self, ctx: &TaskContext, plugins: &PluginMap) -> Result<Completion, RecipeError> {
        (self.func)(ctx, plugins)
    }
}

/// A recipe manifest file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeManifest {
    #[serde(default)]
    pub recipe: RecipeMetadata,
    pub script: String,
}

/// Recipe metadata, readable without running anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeMetadata {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// A recipe backed by a manifest's bash script.
#[derive(Debug, Clone)]
pub struct ScriptRecipe {
    name: String,
    manifest: RecipeManifest,
    root: PathBuf,
}

impl ScriptRecipe {
    pub fn new(name: &str, manifest: RecipeManifest, root: &Path) -> Self {
        Self {
            name: name.to_string(),
            manifest,
            root: root.to_path_buf(),
        }
    }

    pub fn manifest(&self) -> &RecipeManifest {
        &self.manifest
    }
}

impl Recipe for ScriptRecipe {
    fn dependencies(&self) -> &[String] {
        &self.manifest.recipe.dependencies
    }

    fn run(&self, ctx: &TaskContext, _plugins: &PluginMap) -> Result<Completion, RecipeError> {
        let script = render_template(&self.manifest.script, ctx).map_err(|message| {
            RecipeError::Template {
                recipe: self.name.clone(),
                message,
            }
        })?;
        let env = [
            ("SODA_TASK", ctx.task().to_string()),
            ("SODA_SRC", ctx.src().display().to_string()),
            ("SODA_SRC_DIR", ctx.src_dir().display().to_string()),
            ("SODA_DEST", ctx.dest().display().to_string()),
        ];
        let child =
            local::spawn_local(&script, &self.root, &env).map_err(|source| RecipeError::Spawn {
                task: ctx.task().to_string(),
                source,
            })?;
        Ok(Completion::Pending(Box::new(ScriptProcess {
            task: ctx.task().to_string(),
            child,
        })))
    }
}

/// Resolve `{{...}}` placeholders against a task context.
///
/// Keys: `src`, `src_dir`, `dest`, `task`, `unit`, `deps`, `options.KEY`,
/// `config.KEY`. `{{options.KEY|fallback}}` substitutes `fallback` when the
/// option is absent.
pub fn render_template(template: &str, ctx: &TaskContext) -> Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let inner = result[open + 2..close - 2].trim();
        let (key, fallback) = match inner.split_once('|') {
            Some((k, f)) => (k.trim(), Some(f.trim())),
            None => (inner, None),
        };

        let found = match key {
            "src" => Some(ctx.src().display().to_string()),
            "src_dir" => Some(ctx.src_dir().display().to_string()),
            "dest" => Some(ctx.dest().display().to_string()),
            "task" => Some(ctx.task().to_string()),
            "unit" => Some(ctx.unit().to_string()),
            "deps" => Some(ctx.deps().join(" ")),
            _ => {
                if let Some(name) = key.strip_prefix("options.") {
                    ctx.options().get(name).map(yaml_value_to_string)
                } else if let Some(name) = key.strip_prefix("config.") {
                    ctx.config().get(name).map(yaml_value_to_string)
                } else {
                    return Err(format!("unknown template variable: {}", key));
                }
            }
        };
        let value = found
            .or_else(|| fallback.map(str::to_string))
            .ok_or_else(|| format!("missing value for {}", key))?;

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

// ============================================================================
// Loader
// ============================================================================

/// Resolves recipe names to recipes, lazily.
#[derive(Clone)]
pub struct RecipeLoader {
    root: PathBuf,
    dir_name: String,
    builtins: IndexMap<String, Arc<dyn Recipe>>,
}

impl RecipeLoader {
    /// Loader for `<root>/<dir_name>`.
    pub fn new(root: &Path, dir_name: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            dir_name: dir_name.to_string(),
            builtins: IndexMap::new(),
        }
    }

    /// Register a builtin recipe; it shadows any manifest of the same name.
    pub fn register(&mut self, name: &str, recipe: Arc<dyn Recipe>) {
        self.builtins.insert(name.to_string(), recipe);
    }

    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.dir_name)
    }

    pub fn recipe_path(&self, name: &str) -> PathBuf {
        self.dir().join(format!("{}.yaml", name))
    }

    /// Resolve `name` to a recipe.
    pub fn load(&self, name: &str) -> Result<Arc<dyn Recipe>, RecipeError> {
        if let Some(recipe) = self.builtins.get(name) {
            return Ok(Arc::clone(recipe));
        }

        let path = self.recipe_path(name);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RecipeError::NotFound {
                    recipe: name.to_string(),
                    dir: self.dir_name.clone(),
                    path: path.clone(),
                }
            } else {
                RecipeError::Load {
                    recipe: name.to_string(),
                    path: path.clone(),
                    source: Box::new(e),
                }
            }
        })?;
        let manifest = parse_manifest(&content).map_err(|e| RecipeError::Load {
            recipe: name.to_string(),
            path: path.clone(),
            source: Box::new(e),
        })?;

        tracing::debug!(recipe = name, path = %path.display(), "loaded recipe manifest");
        Ok(Arc::new(ScriptRecipe::new(name, manifest, &self.root)))
    }
}

impl fmt::Debug for RecipeLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecipeLoader")
            .field("dir", &self.dir())
            .field("builtins", &self.builtins.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Parse a recipe manifest from a YAML string.
pub fn parse_manifest(yaml: &str) -> Result<RecipeManifest, serde_yaml_ng::Error> {
    serde_yaml_ng::from_str(yaml)
}
