//! SD-009: Registration of the resolved graph with a task runner.
//!
//! Registration order: for each unit its tasks, its groups, then the unit
//! default task; then one shortcut per recipe name; then aliases; then
//! `default` over every unit; then the reserved `install` task. Recipe
//! bodies are deferred: nothing is loaded until a body runs.

use super::error::{ConfigError, TaskError};
use super::installer::{check_and_install, InstallCheck, InstallOptions, NpmInstaller};
use super::plugins::PluginCatalog;
use super::recipe::{Completion, RecipeLoader, TaskContext};
use super::resolver::task_base_name;
use super::types::*;
use indexmap::IndexSet;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Work attached to a registered task.
pub type TaskBody = Box<dyn Fn() -> Result<Completion, TaskError> + Send + Sync>;

/// Anything tasks can be registered with.
pub trait TaskRunner {
    /// Register `name` depending on `deps`. Tasks without a body only
    /// aggregate their dependencies.
    fn task(&mut self, name: &str, deps: Vec<String>, body: Option<TaskBody>);
}

/// What produced a registered name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Recipe,
    DependencyOnly,
    Group,
    UnitDefault,
    Shortcut,
    Alias,
    Root,
    Install,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryKind::Recipe => "recipe",
            EntryKind::DependencyOnly => "dependency-only",
            EntryKind::Group => "group",
            EntryKind::UnitDefault => "unit",
            EntryKind::Shortcut => "shortcut",
            EntryKind::Alias => "alias",
            EntryKind::Root => "root",
            EntryKind::Install => "install",
        };
        write!(f, "{}", s)
    }
}

/// One name to register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub name: String,
    pub deps: Vec<String>,
    pub kind: EntryKind,
}

/// Every registration for a resolved graph, in registration order.
pub fn registrations(
    config: &SodaConfig,
    graph: &ResolvedGraph,
) -> Result<Vec<Registration>, ConfigError> {
    let mut out = Vec::new();

    for (unit, defaults) in &graph.defaults {
        for info in graph.tasks.values().filter(|t| &t.unit == unit) {
            let kind = if info.is_dependency_only() {
                EntryKind::DependencyOnly
            } else {
                EntryKind::Recipe
            };
            out.push(entry(&info.id, info.deps.clone(), kind)?);
        }
        for (name, members) in &graph.groups {
            let owned = graph
                .tasks
                .values()
                .any(|t| &t.unit == unit && task_base_name(&t.recipe, unit) == *name);
            if owned {
                out.push(entry(name, members.clone(), EntryKind::Group)?);
            }
        }
        out.push(entry(unit, defaults.clone(), EntryKind::UnitDefault)?);
    }

    for (recipe, ids) in &graph.recipe_tasks {
        out.push(entry(recipe, ids.clone(), EntryKind::Shortcut)?);
    }
    for (alias, deps) in &config.aliases {
        out.push(entry(alias, alias_deps(graph, deps), EntryKind::Alias)?);
    }
    out.push(entry(
        ROOT_TASK,
        graph.defaults.keys().cloned().collect(),
        EntryKind::Root,
    )?);
    out.push(entry(RESERVED_TASK, Vec::new(), EntryKind::Install)?);

    Ok(out)
}

/// Alias dependencies with dependency-only task ids replaced by their
/// flattened dependencies.
fn alias_deps(graph: &ResolvedGraph, deps: &[String]) -> Vec<String> {
    let mut out: IndexSet<String> = IndexSet::new();
    for dep in deps {
        match graph.task(dep) {
            Some(info) if info.is_dependency_only() => out.extend(info.deps.iter().cloned()),
            _ => {
                out.insert(dep.clone());
            }
        }
    }
    out.into_iter().collect()
}

fn entry(name: &str, deps: Vec<String>, kind: EntryKind) -> Result<Registration, ConfigError> {
    if name == RESERVED_TASK && kind != EntryKind::Install {
        return Err(ConfigError::ReservedName {
            name: name.to_string(),
            kind: "task",
        });
    }
    Ok(Registration {
        name: name.to_string(),
        deps,
        kind,
    })
}

/// State shared by every task body.
#[derive(Debug, Clone)]
pub struct BodyContext {
    pub root: PathBuf,
    pub global: Arc<Options>,
    pub graph: Arc<ResolvedGraph>,
    pub loader: Arc<RecipeLoader>,
    pub catalog: Arc<PluginCatalog>,
}

/// Body of a recipe task: load the recipe, check its declared packages,
/// then run it.
pub fn recipe_body(shared: BodyContext, id: String) -> TaskBody {
    Box::new(move || {
        let info = shared
            .graph
            .task(&id)
            .ok_or_else(|| TaskError::Unresolved(id.clone()))?;
        let recipe = shared.loader.load(&info.recipe)?;

        if !recipe.dependencies().is_empty() {
            for package in shared.catalog.missing(recipe.dependencies()) {
                tracing::warn!(
                    "recipe '{}' needs '{}' which is not among the project's dev-dependencies; run `soda install`",
                    info.recipe,
                    package
                );
            }
        }

        let ctx = TaskContext::new(
            info.clone(),
            Arc::clone(&shared.global),
            Arc::clone(&shared.graph),
        );
        tracing::debug!(task = %id, recipe = %info.recipe, "running recipe");
        Ok(recipe.run(&ctx, shared.catalog.plugins())?)
    })
}

/// Body of the reserved `install` task.
pub fn install_body(shared: BodyContext) -> TaskBody {
    Box::new(move || {
        let installer = NpmInstaller::new(&shared.root);
        check_and_install(&InstallCheck {
            root: &shared.root,
            recipe_dir: &shared.loader.dir(),
            dev_dependencies: shared.catalog.dev_dependencies(),
            installer: &installer,
            opts: InstallOptions {
                save_dev: true,
                dry_run: false,
            },
        })?;
        Ok(Completion::Done)
    })
}

/// Register every entry with `runner`, attaching bodies to recipe tasks
/// and to `install`.
pub fn register_all(
    entries: Vec<Registration>,
    shared: &BodyContext,
    runner: &mut dyn TaskRunner,
) {
    for reg in entries {
        let body = match reg.kind {
            EntryKind::Recipe => Some(recipe_body(shared.clone(), reg.name.clone())),
            EntryKind::Install => Some(install_body(shared.clone())),
            _ => None,
        };
        runner.task(&reg.name, reg.deps, body);
    }
}
