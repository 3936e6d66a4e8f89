//! SD-002: Config loading, invocation grammar, and validation.
//!
//! Loads soda.yaml (or soda.toml) and validates structural constraints:
//! - `install` is never used as a unit, alias or recipe name
//! - every target names a known range
//! - target and invocation specs are well formed
//! - invocation dependencies name invocations of the same range

use super::error::ConfigError;
use super::types::*;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Separator between the fields of a target or invocation spec.
static SPEC_DELIMITER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[:\s]\s*").expect("static regex"));

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a config file from disk. `.toml` files are read as TOML,
/// everything else as YAML.
pub fn parse_config_file(path: &Path) -> Result<SodaConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => parse_config_toml(&content),
        _ => parse_config(&content),
    }
}

/// Parse a config from a YAML string.
pub fn parse_config(yaml: &str) -> Result<SodaConfig, ConfigError> {
    Ok(serde_yaml_ng::from_str(yaml)?)
}

/// Parse a config from a TOML string.
pub fn parse_config_toml(source: &str) -> Result<SodaConfig, ConfigError> {
    Ok(toml::from_str(source)?)
}

fn split_spec(spec: &str) -> Vec<&str> {
    SPEC_DELIMITER.split(spec.trim()).collect()
}

/// Parse `<range>[: <dest>]`.
pub fn parse_target(unit: &str, spec: &str) -> Result<Target, ConfigError> {
    let malformed = |reason| ConfigError::MalformedSpec {
        unit: unit.to_string(),
        what: "target",
        spec: spec.to_string(),
        reason,
    };

    let parts = split_spec(spec);
    if parts.iter().any(|p| p.is_empty()) {
        return Err(malformed("empty field"));
    }
    match parts.as_slice() {
        [range] => Ok(Target {
            range: range.to_string(),
            dest: None,
        }),
        [range, dest] => Ok(Target {
            range: range.to_string(),
            dest: Some(dest.to_string()),
        }),
        _ => Err(malformed("expected `<range>[: <dest>]`")),
    }
}

/// Parse `<recipe>|[<recipe>][: <dep>...]`.
pub fn parse_invocation(unit: &str, spec: &str) -> Result<Invocation, ConfigError> {
    let malformed = |reason| ConfigError::MalformedSpec {
        unit: unit.to_string(),
        what: "recipe invocation",
        spec: spec.to_string(),
        reason,
    };

    let parts = split_spec(spec);
    if parts.iter().any(|p| p.is_empty()) {
        return Err(malformed("empty field"));
    }
    let (head, deps) = parts.split_first().ok_or_else(|| malformed("empty"))?;

    let (recipe, dependency_only) = match head.strip_prefix('[') {
        Some(rest) => (
            rest.strip_suffix(']')
                .ok_or_else(|| malformed("unbalanced brackets"))?,
            true,
        ),
        None => (*head, false),
    };
    if recipe.is_empty() {
        return Err(malformed("empty recipe name"));
    }
    if recipe.contains(['[', ']']) || deps.iter().any(|d| d.contains(['[', ']'])) {
        return Err(malformed("brackets only wrap the recipe name"));
    }

    Ok(Invocation {
        recipe: recipe.to_string(),
        dependency_only,
        deps: deps.iter().map(|d| d.to_string()).collect(),
    })
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &SodaConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    for unit in config.inputs.keys() {
        if unit == RESERVED_TASK {
            push(format!("'{}' is a reserved task name (used as unit)", unit));
        }
    }
    for alias in config.aliases.keys() {
        if alias == RESERVED_TASK {
            push(format!("'{}' is a reserved task name (used as alias)", alias));
        }
    }

    // Ranges are checked once each; a range may be shared by many units
    for (range, invocations) in &config.targets {
        let mut names = Vec::new();
        let mut parsed = Vec::new();
        for spec in invocations {
            match parse_invocation(range, spec) {
                Ok(inv) => {
                    names.push(inv.recipe.clone());
                    parsed.push(inv);
                }
                Err(e) => push(e.to_string()),
            }
        }
        for inv in &parsed {
            if inv.recipe == RESERVED_TASK {
                push(format!(
                    "'{}' is a reserved task name (used as recipe in range '{}')",
                    inv.recipe, range
                ));
            }
            for dep in &inv.deps {
                if dep == &inv.recipe {
                    push(format!(
                        "recipe '{}' in range '{}' depends on itself",
                        inv.recipe, range
                    ));
                } else if !names.contains(dep) {
                    push(format!(
                        "recipe '{}' in range '{}' depends on unknown invocation '{}'",
                        inv.recipe, range, dep
                    ));
                }
            }
        }
    }

    for (unit, spec) in &config.inputs {
        if spec.is_empty() {
            push(format!("unit '{}' has no targets", unit));
        }
        for target_spec in spec.to_vec() {
            match parse_target(unit, target_spec) {
                Ok(target) => {
                    if !config.targets.contains_key(&target.range) {
                        push(format!(
                            "unit '{}' targets unknown range '{}'",
                            unit, target.range
                        ));
                    }
                }
                Err(e) => push(e.to_string()),
            }
        }
    }

    if let Some(ref pattern) = config.plugins.pattern {
        if let Err(e) = Regex::new(pattern) {
            push(format!("invalid plugin pattern \"{}\": {}", pattern, e));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sd002_parse_valid() {
        let yaml = r#"
inputs:
  app: web
targets:
  web: [transpile, "copy: transpile"]
"#;
        let config = parse_config(yaml).unwrap();
        let errors = validate_config(&config);
        assert!(
            errors.is_empty(),
            "unexpected errors: {:?}",
            errors.iter().map(|e| &e.message).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_sd002_parse_toml() {
        let source = r#"
src = "source"
recipes = "recipes"

[inputs]
app = ["web: w1", "mobile: w2"]

[targets]
web = ["build"]
mobile = ["build"]

[options."*"]
src = "**/*.js"
"#;
        let config = parse_config_toml(source).unwrap();
        assert_eq!(config.src_dir(), "source");
        assert_eq!(config.recipe_dir(), "recipes");
        assert_eq!(config.inputs["app"].len(), 2);
        assert_eq!(
            yaml_value_to_string(&config.options["*"]["src"]),
            "**/*.js"
        );
    }

    #[test]
    fn test_sd002_parse_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("soda.yaml");
        std::fs::write(&yaml, "inputs:\n  app: web\ntargets:\n  web: [copy]\n").unwrap();
        let toml = dir.path().join("soda.toml");
        std::fs::write(&toml, "[inputs]\napp = \"web\"\n[targets]\nweb = [\"copy\"]\n").unwrap();

        assert_eq!(parse_config_file(&yaml).unwrap().inputs.len(), 1);
        assert_eq!(parse_config_file(&toml).unwrap().inputs.len(), 1);
    }

    #[test]
    fn test_sd002_missing_file() {
        let result = parse_config_file(Path::new("/nonexistent/soda.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_sd002_parse_invalid_yaml() {
        let result = parse_config("inputs: [valid: yaml: {{");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_sd002_target_grammar() {
        assert_eq!(
            parse_target("app", "web").unwrap(),
            Target {
                range: "web".to_string(),
                dest: None
            }
        );
        assert_eq!(
            parse_target("app", "web: public/w1").unwrap(),
            Target {
                range: "web".to_string(),
                dest: Some("public/w1".to_string())
            }
        );
        assert_eq!(parse_target("app", "web w1").unwrap().dest.as_deref(), Some("w1"));
        assert!(parse_target("app", "web: a: b").is_err());
        assert!(parse_target("app", "").is_err());
    }

    #[test]
    fn test_sd002_invocation_grammar() {
        let inv = parse_invocation("app", "copy: transpile").unwrap();
        assert_eq!(inv.recipe, "copy");
        assert!(!inv.dependency_only);
        assert_eq!(inv.deps, vec!["transpile"]);

        let inv = parse_invocation("app", "[watch]: lint : test").unwrap();
        assert_eq!(inv.recipe, "watch");
        assert!(inv.dependency_only);
        assert_eq!(inv.deps, vec!["lint", "test"]);

        let inv = parse_invocation("app", "  transpile  ").unwrap();
        assert_eq!(inv.recipe, "transpile");
        assert!(inv.deps.is_empty());
    }

    #[test]
    fn test_sd002_invocation_malformed() {
        assert!(parse_invocation("app", "[watch: lint").is_err());
        assert!(parse_invocation("app", "[]").is_err());
        assert!(parse_invocation("app", "copy::lint").is_err());
        assert!(parse_invocation("app", "copy: [lint]").is_err());
        assert!(parse_invocation("app", "").is_err());
    }

    #[test]
    fn test_sd002_reserved_unit() {
        let yaml = r#"
inputs:
  install: web
targets:
  web: [copy]
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(errors.iter().any(|e| e.message.contains("reserved")));
    }

    #[test]
    fn test_sd002_reserved_alias() {
        let yaml = r#"
aliases:
  install: [copy-app]
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(errors.iter().any(|e| e.message.contains("used as alias")));
    }

    #[test]
    fn test_sd002_unknown_range() {
        let yaml = r#"
inputs:
  app: mobile
targets:
  web: [copy]
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(errors.iter().any(|e| e.message.contains("unknown range 'mobile'")));
    }

    #[test]
    fn test_sd002_unknown_sibling_dependency() {
        let yaml = r#"
targets:
  web: ["copy: transpile"]
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(errors
            .iter()
            .any(|e| e.message.contains("unknown invocation 'transpile'")));
    }

    #[test]
    fn test_sd002_self_dependency() {
        let yaml = r#"
targets:
  web: ["copy: copy"]
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(errors.iter().any(|e| e.message.contains("depends on itself")));
    }

    #[test]
    fn test_sd002_bad_plugin_pattern() {
        let yaml = "plugins:\n  pattern: '(unclosed'\n";
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(errors.iter().any(|e| e.message.contains("plugin pattern")));
    }
}
