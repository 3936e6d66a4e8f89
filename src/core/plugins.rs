//! SD-006: Plugin catalog from the project's package manifest.
//!
//! Plugins are the project's dev-dependencies whose names match the
//! configured pattern. The catalog is owned by the generator and built on
//! first access, then held for the generator's lifetime.

use super::error::ConfigError;
use super::types::{PluginOptions, PluginTransform};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Package name pattern used when the config gives none.
pub const DEFAULT_PLUGIN_PATTERN: &str = r"^(gulp|vinyl)-";

/// Packages belonging to this tool, never treated as plugins.
const SELF_PACKAGE: &str = "gulp-soda";

/// The parts of `package.json` soda reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, rename = "devDependencies")]
    pub dev_dependencies: IndexMap<String, String>,
}

/// Read a `package.json`.
pub fn load_package_manifest(path: &Path) -> Result<PackageManifest, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("cannot parse {}: {}", path.display(), e))
}

/// A discovered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plugin {
    /// Package name as listed in dev-dependencies
    pub package: String,
    /// Declared version requirement
    pub version: String,
}

/// Plugins keyed by transformed name.
pub type PluginMap = IndexMap<String, Plugin>;

impl PluginTransform {
    /// Plugin key for a package name.
    pub fn apply(&self, package: &str) -> String {
        match self {
            PluginTransform::StripPrefix => {
                let stripped = match package.split_once('-') {
                    Some((head, rest))
                        if !head.is_empty()
                            && !rest.is_empty()
                            && head.chars().all(|c| c.is_alphanumeric() || c == '_') =>
                    {
                        rest
                    }
                    _ => package,
                };
                stripped.replace('-', "_")
            }
            PluginTransform::Snake => package.replace('-', "_"),
            PluginTransform::Verbatim => package.to_string(),
        }
    }
}

#[derive(Debug)]
struct CatalogState {
    dev_dependencies: IndexMap<String, String>,
    plugins: PluginMap,
}

/// Lazily built view of the project's dev-dependencies and plugins.
#[derive(Debug)]
pub struct PluginCatalog {
    manifest_path: PathBuf,
    pattern: Regex,
    transform: PluginTransform,
    state: OnceLock<CatalogState>,
}

impl PluginCatalog {
    pub fn new(root: &Path, options: &PluginOptions) -> Result<Self, ConfigError> {
        let pattern_src = options.pattern.as_deref().unwrap_or(DEFAULT_PLUGIN_PATTERN);
        let pattern = Regex::new(pattern_src).map_err(|source| ConfigError::PluginPattern {
            pattern: pattern_src.to_string(),
            source,
        })?;
        Ok(Self {
            manifest_path: root.join("package.json"),
            pattern,
            transform: options.transform,
            state: OnceLock::new(),
        })
    }

    fn state(&self) -> &CatalogState {
        self.state.get_or_init(|| {
            let dev_dependencies = match load_package_manifest(&self.manifest_path) {
                Ok(manifest) => manifest.dev_dependencies,
                Err(e) => {
                    tracing::warn!("{}; assuming no dev-dependencies", e);
                    IndexMap::new()
                }
            };
            let plugins = self.discover(&dev_dependencies);
            tracing::debug!(count = plugins.len(), "plugin catalog built");
            CatalogState {
                dev_dependencies,
                plugins,
            }
        })
    }

    fn discover(&self, dev_dependencies: &IndexMap<String, String>) -> PluginMap {
        dev_dependencies
            .iter()
            .filter(|(name, _)| self.pattern.is_match(name))
            .filter(|(name, _)| {
                name.as_str() != SELF_PACKAGE && !name.starts_with(&format!("{}-", SELF_PACKAGE))
            })
            .map(|(name, version)| {
                (
                    self.transform.apply(name),
                    Plugin {
                        package: name.clone(),
                        version: version.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn plugins(&self) -> &PluginMap {
        &self.state().plugins
    }

    pub fn dev_dependencies(&self) -> &IndexMap<String, String> {
        &self.state().dev_dependencies
    }

    /// Declared packages (`name` or `name@range`) absent from dev-dependencies.
    pub fn missing<'a>(&self, declared: &'a [String]) -> Vec<&'a str> {
        let dev = self.dev_dependencies();
        declared
            .iter()
            .map(String::as_str)
            .filter(|spec| {
                let name = super::installer::parse_package_spec(spec)
                    .map(|(name, _)| name)
                    .unwrap_or(*spec);
                !dev.contains_key(name)
            })
            .collect()
    }
}
