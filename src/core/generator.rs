//! SD-012: Generator entry point.
//!
//! Reads a configuration, resolves the task graph once, and registers it
//! with a runner. Resolution errors surface from `new`, before anything
//! is registered.

use super::error::{ConfigError, InstallError};
use super::installer::{
    check_and_install, InstallCheck, InstallOptions, InstallReport, PackageInstaller,
};
use super::parser;
use super::plugins::PluginCatalog;
use super::recipe::{Recipe, RecipeLoader};
use super::registrar::{self, BodyContext, Registration, TaskRunner};
use super::resolver;
use super::types::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A resolved project, ready to register.
#[derive(Debug)]
pub struct Generator {
    root: PathBuf,
    config: Arc<SodaConfig>,
    graph: Arc<ResolvedGraph>,
    loader: Arc<RecipeLoader>,
    catalog: Arc<PluginCatalog>,
    registrations: Vec<Registration>,
}

impl Generator {
    /// Resolve `config` for a project rooted at `root`.
    pub fn new(root: &Path, config: SodaConfig) -> Result<Self, ConfigError> {
        let graph = resolver::resolve(&config)?;
        // Reserved names are rejected before any runner sees a task
        let registrations = registrar::registrations(&config, &graph)?;
        let loader = RecipeLoader::new(root, config.recipe_dir());
        let catalog = PluginCatalog::new(root, &config.plugins)?;
        tracing::debug!(
            tasks = graph.tasks.len(),
            groups = graph.groups.len(),
            "resolved task graph"
        );
        Ok(Self {
            root: root.to_path_buf(),
            config: Arc::new(config),
            graph: Arc::new(graph),
            loader: Arc::new(loader),
            catalog: Arc::new(catalog),
            registrations,
        })
    }

    /// Load a config file; the project root is the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = parser::parse_config_file(path)?;
        let root = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::new(&root, config)
    }

    /// Add a builtin recipe, shadowing any manifest with the same name.
    pub fn with_recipe(mut self, name: &str, recipe: Arc<dyn Recipe>) -> Self {
        Arc::make_mut(&mut self.loader).register(name, recipe);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &SodaConfig {
        &self.config
    }

    pub fn graph(&self) -> &ResolvedGraph {
        &self.graph
    }

    pub fn loader(&self) -> &RecipeLoader {
        &self.loader
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    /// Every name that `register` would register, in order.
    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    fn body_context(&self) -> BodyContext {
        BodyContext {
            root: self.root.clone(),
            global: Arc::new(self.config.config.clone()),
            graph: Arc::clone(&self.graph),
            loader: Arc::clone(&self.loader),
            catalog: Arc::clone(&self.catalog),
        }
    }

    /// Register every task with `runner`.
    pub fn register(&self, runner: &mut dyn TaskRunner) {
        registrar::register_all(self.registrations.clone(), &self.body_context(), runner);
    }

    /// Run the dependency-completeness check with a chosen installer.
    pub fn install(
        &self,
        installer: &dyn PackageInstaller,
        opts: InstallOptions,
    ) -> Result<InstallReport, InstallError> {
        check_and_install(&InstallCheck {
            root: &self.root,
            recipe_dir: &self.loader.dir(),
            dev_dependencies: self.catalog.dev_dependencies(),
            installer,
            opts,
        })
    }
}
