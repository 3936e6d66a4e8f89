//! SD-007: Dependency-completeness check for recipe manifests.
//!
//! Reads the `dependencies` every recipe manifest declares, without running
//! any recipe, and reconciles them with the project's dev-dependencies:
//! absent packages are installed, installed packages whose version falls
//! outside the declared range are reported.

use super::error::InstallError;
use super::recipe::parse_manifest;
use crate::transport::local;
use indexmap::IndexMap;
use regex::Regex;
use semver::{Version, VersionReq};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// `name` or `name@range`.
static PACKAGE_SPEC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^\s@]+)(?:@(.+)|)$").expect("static regex"));

/// Boundary between space-separated comparators (`>=1.0.0 <2.0.0`).
static COMPARATOR_GAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d*xX])\s+([<>=^~\d])").expect("static regex"));

/// Split a package spec into name and optional version range.
pub fn parse_package_spec(spec: &str) -> Option<(&str, Option<&str>)> {
    let caps = PACKAGE_SPEC.captures(spec)?;
    let name = caps.get(1)?.as_str();
    Some((name, caps.get(2).map(|m| m.as_str())))
}

/// Parse an npm-style range into a semver requirement.
pub fn parse_range(range: &str) -> Result<VersionReq, semver::Error> {
    let normalized = COMPARATOR_GAP.replace_all(range.trim(), "$1, $2");
    VersionReq::parse(&normalized)
}

/// Every declared package spec, mapped to the manifest files declaring it.
pub fn scan_recipe_dependencies(dir: &Path) -> Result<IndexMap<String, Vec<String>>, InstallError> {
    let pattern = dir.join("*.yaml");
    let entries = glob::glob(&pattern.to_string_lossy()).map_err(|source| InstallError::Scan {
        dir: dir.to_path_buf(),
        source,
    })?;

    let mut declared: IndexMap<String, Vec<String>> = IndexMap::new();
    let mut files: Vec<PathBuf> = entries.filter_map(Result::ok).collect();
    files.sort();
    for path in files {
        let content = std::fs::read_to_string(&path).map_err(|e| InstallError::Manifest {
            path: path.clone(),
            source: Box::new(e),
        })?;
        let manifest = parse_manifest(&content).map_err(|e| InstallError::Manifest {
            path: path.clone(),
            source: Box::new(e),
        })?;
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        for spec in manifest.recipe.dependencies {
            declared.entry(spec).or_default().push(file.clone());
        }
    }
    Ok(declared)
}

/// Version of an installed package, read from `node_modules`.
pub fn installed_version(root: &Path, package: &str) -> Result<String, String> {
    let path = root.join("node_modules").join(package).join("package.json");
    let manifest = super::plugins::load_package_manifest(&path)?;
    manifest
        .version
        .ok_or_else(|| format!("{} has no version field", path.display()))
}

// ============================================================================
// Installers
// ============================================================================

/// Installs packages into the project.
pub trait PackageInstaller {
    fn install(&self, packages: &[String], opts: &InstallOptions) -> Result<(), String>;
}

/// Installs through `npm install`.
#[derive(Debug, Clone)]
pub struct NpmInstaller {
    root: PathBuf,
}

impl NpmInstaller {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn command(packages: &[String], opts: &InstallOptions) -> String {
        let mut script = String::from("npm install");
        if opts.save_dev {
            script.push_str(" --save-dev");
        }
        for package in packages {
            script.push_str(&format!(" '{}'", package.replace('\'', r"'\''")));
        }
        script
    }
}

impl PackageInstaller for NpmInstaller {
    fn install(&self, packages: &[String], opts: &InstallOptions) -> Result<(), String> {
        let script = Self::command(packages, opts);
        tracing::debug!(%script, "running installer");
        local::exec_local(&script, &self.root)?.check()?;
        Ok(())
    }
}

// ============================================================================
// Check
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Record installed packages as dev-dependencies
    pub save_dev: bool,
    /// Report what would be installed without installing
    pub dry_run: bool,
}

/// An installed package outside its declared range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionMismatch {
    pub package: String,
    pub installed: String,
    pub required: String,
    pub sources: Vec<String>,
}

/// Outcome of a completeness check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    /// Specs installed (or, on a dry run, that would be)
    pub installed: Vec<String>,
    pub mismatches: Vec<VersionMismatch>,
    pub unparsable: Vec<String>,
}

impl InstallReport {
    pub fn all_met(&self) -> bool {
        self.installed.is_empty() && self.mismatches.is_empty() && self.unparsable.is_empty()
    }
}

/// Inputs of a completeness check.
pub struct InstallCheck<'a> {
    pub root: &'a Path,
    pub recipe_dir: &'a Path,
    pub dev_dependencies: &'a IndexMap<String, String>,
    pub installer: &'a dyn PackageInstaller,
    pub opts: InstallOptions,
}

/// Scan recipe manifests, install absent packages, report version drift.
pub fn check_and_install(check: &InstallCheck) -> Result<InstallReport, InstallError> {
    let declared = scan_recipe_dependencies(check.recipe_dir)?;
    let mut report = InstallReport::default();

    for (spec, sources) in &declared {
        let Some((name, range)) = parse_package_spec(spec) else {
            tracing::warn!(
                "failed to interpret package name \"{}\" referenced in: {}",
                spec,
                sources.join(", ")
            );
            report.unparsable.push(spec.clone());
            continue;
        };

        if !check.dev_dependencies.contains_key(name) {
            report.installed.push(spec.clone());
            continue;
        }
        let Some(range) = range else { continue };

        let version = match installed_version(check.root, name) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("cannot verify '{}': {}", name, e);
                continue;
            }
        };
        let satisfied = match (Version::parse(&version), parse_range(range)) {
            (Ok(v), Ok(req)) => req.matches(&v),
            (v, req) => {
                tracing::warn!(
                    "cannot compare '{}' v{} against {}: {}",
                    name,
                    version,
                    range,
                    v.err().or(req.err()).map(|e| e.to_string()).unwrap_or_default()
                );
                continue;
            }
        };
        if !satisfied {
            tracing::warn!(
                "currently installed version of '{}' (v{}) is not satisfied by semantic version requirement {} referenced in: {}",
                name,
                version,
                range,
                sources.join(", ")
            );
            report.mismatches.push(VersionMismatch {
                package: name.to_string(),
                installed: version,
                required: range.to_string(),
                sources: sources.clone(),
            });
        }
    }

    if report.installed.is_empty() {
        tracing::info!("all plugin dependencies met");
        return Ok(report);
    }
    if check.opts.dry_run {
        tracing::info!("would install packages: {}", report.installed.join(", "));
        return Ok(report);
    }

    tracing::info!("installing packages: {}...", report.installed.join(", "));
    check
        .installer
        .install(&report.installed, &check.opts)
        .map_err(|message| InstallError::Install {
            packages: report.installed.join(", "),
            message,
        })?;
    tracing::info!("successfully installed {} packages", report.installed.len());
    Ok(report)
}
