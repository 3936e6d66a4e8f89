//! SD-003: Task naming, dependency flattening, and execution ordering.
//!
//! Every recipe invocation of every unit becomes a task named
//! `{recipe}-{unit}`, suffixed with `-{range}` when the unit has more than
//! one target. Dependency-only tasks (`[name]`) are expanded in place
//! wherever they are referenced, transitively and independent of
//! declaration order. Execution order is computed with Kahn's algorithm
//! using alphabetical tie-breaking for determinism.

use super::error::{ConfigError, RunError};
use super::options::{merge_options, option_str};
use super::parser::{parse_invocation, parse_target};
use super::types::*;
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};

/// Base (unsuffixed) task name of a recipe invocation in a unit.
pub fn task_base_name(recipe: &str, unit: &str) -> String {
    format!("{}-{}", recipe, unit)
}

/// Full task id of a recipe invocation in a unit.
pub fn task_id(recipe: &str, unit: &str, suffix: &str) -> String {
    format!("{}-{}{}", recipe, unit, suffix)
}

/// Resolve a configuration into its complete task graph.
pub fn resolve(config: &SodaConfig) -> Result<ResolvedGraph, ConfigError> {
    check_reserved(config)?;

    let src_root = PathBuf::from(config.src_dir());
    let dest_root = PathBuf::from(config.dest_dir());
    let mut graph = ResolvedGraph::default();

    for (unit, spec) in &config.inputs {
        resolve_unit(config, unit, spec, &src_root, &dest_root, &mut graph)?;
    }

    Ok(graph)
}

fn check_reserved(config: &SodaConfig) -> Result<(), ConfigError> {
    let reserved = |name: &str, kind| {
        if name == RESERVED_TASK {
            Err(ConfigError::ReservedName {
                name: name.to_string(),
                kind,
            })
        } else {
            Ok(())
        }
    };
    for unit in config.inputs.keys() {
        reserved(unit, "unit")?;
    }
    for alias in config.aliases.keys() {
        reserved(alias, "alias")?;
    }
    for (range, invocations) in &config.targets {
        // Malformed specs are reported with their unit during resolution
        for inv in invocations.iter().filter_map(|s| parse_invocation(range, s).ok()) {
            reserved(&inv.recipe, "recipe")?;
        }
    }
    Ok(())
}

fn resolve_unit(
    config: &SodaConfig,
    unit: &str,
    spec: &TargetSpec,
    src_root: &Path,
    dest_root: &Path,
    graph: &mut ResolvedGraph,
) -> Result<(), ConfigError> {
    let targets = spec.to_vec();
    let multiple = targets.len() > 1;
    let src_dir = src_root.join(unit);

    let mut tasks: IndexMap<String, TaskInfo> = IndexMap::new();
    let mut groups: IndexMap<String, Vec<String>> = IndexMap::new();
    let mut defaults = Vec::new();

    for target_spec in targets {
        let target = parse_target(unit, target_spec)?;
        let invocations =
            config
                .targets
                .get(&target.range)
                .ok_or_else(|| ConfigError::UnknownRange {
                    unit: unit.to_string(),
                    range: target.range.clone(),
                    known: config
                        .targets
                        .keys()
                        .map(String::as_str)
                        .collect::<Vec<_>>()
                        .join(", "),
                })?;

        let suffix = if multiple {
            format!("-{}", target.range)
        } else {
            String::new()
        };
        let task_dest_root = target
            .dest
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| dest_root.to_path_buf());

        for (index, spec) in invocations.iter().enumerate() {
            let inv = parse_invocation(unit, spec)?;
            let id = task_id(&inv.recipe, unit, &suffix);

            if multiple {
                groups
                    .entry(task_base_name(&inv.recipe, unit))
                    .or_default()
                    .push(id.clone());
            }
            if index == 0 {
                defaults.push(id.clone());
            }

            let options = merge_options(&config.options, &inv.recipe, &id);
            let src = match option_str(&options, "src") {
                Some(s) if !s.is_empty() => nest(&src_dir, &s),
                _ => src_dir.clone(),
            };

            tasks.insert(
                id.clone(),
                TaskInfo {
                    id,
                    unit: unit.to_string(),
                    range: target.range.clone(),
                    recipe: inv.recipe.clone(),
                    kind: if inv.dependency_only {
                        TaskKind::DependencyOnly
                    } else {
                        TaskKind::Recipe
                    },
                    suffix: suffix.clone(),
                    src_dir: src_dir.clone(),
                    src,
                    dest_root: task_dest_root.clone(),
                    dest: task_dest_root.join(unit),
                    deps: inv
                        .deps
                        .iter()
                        .map(|dep| task_id(dep, unit, &suffix))
                        .collect(),
                    options,
                },
            );
        }
    }

    let expanded = flatten_dependency_only(&mut tasks)?;

    for (id, info) in tasks {
        if !info.is_dependency_only() {
            graph
                .recipe_tasks
                .entry(info.recipe.clone())
                .or_default()
                .push(id.clone());
        }
        graph.tasks.insert(id, info);
    }
    for (name, members) in groups {
        if members.len() > 1 {
            graph.groups.insert(name, splice(&members, &expanded));
        }
    }
    graph
        .defaults
        .insert(unit.to_string(), splice(&defaults, &expanded));

    Ok(())
}

/// Join a task's `src` option under the unit's source directory. Root and
/// prefix components are dropped so the result always nests; `..` is
/// folded lexically.
fn nest(src_dir: &Path, src: &str) -> PathBuf {
    let mut out = src_dir.to_path_buf();
    for component in Path::new(src).components() {
        match component {
            Component::Normal(_) => out.push(component),
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push(component);
                }
            }
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
        }
    }
    out
}

/// Replace every reference to a dependency-only task by that task's own
/// (recursively expanded) dependency list. Duplicates keep their first
/// position. Returns the expansion of each dependency-only id so other
/// lists naming them (groups, unit defaults) can be spliced the same way.
fn flatten_dependency_only(
    tasks: &mut IndexMap<String, TaskInfo>,
) -> Result<HashMap<String, Vec<String>>, ConfigError> {
    let raw: HashMap<String, Vec<String>> = tasks
        .values()
        .filter(|t| t.is_dependency_only())
        .map(|t| (t.id.clone(), t.deps.clone()))
        .collect();
    if raw.is_empty() {
        return Ok(HashMap::new());
    }

    let mut expanded: HashMap<String, Vec<String>> = HashMap::new();
    for id in raw.keys() {
        let mut stack = Vec::new();
        expand(id, &raw, &mut expanded, &mut stack)?;
    }

    for task in tasks.values_mut() {
        task.deps = splice(&task.deps, &expanded);
    }
    Ok(expanded)
}

fn expand(
    id: &str,
    raw: &HashMap<String, Vec<String>>,
    expanded: &mut HashMap<String, Vec<String>>,
    stack: &mut Vec<String>,
) -> Result<(), ConfigError> {
    if expanded.contains_key(id) {
        return Ok(());
    }
    if stack.iter().any(|s| s == id) {
        stack.push(id.to_string());
        return Err(ConfigError::DependencyCycle(stack.join(" -> ")));
    }

    stack.push(id.to_string());
    for dep in &raw[id] {
        if raw.contains_key(dep) {
            expand(dep, raw, expanded, stack)?;
        }
    }
    stack.pop();

    let deps = splice(&raw[id], expanded);
    expanded.insert(id.to_string(), deps);
    Ok(())
}

fn splice(deps: &[String], expanded: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut out: IndexSet<String> = IndexSet::new();
    for dep in deps {
        match expanded.get(dep) {
            Some(inner) => out.extend(inner.iter().cloned()),
            None => {
                out.insert(dep.clone());
            }
        }
    }
    out.into_iter().collect()
}

/// Collect `roots` and their transitive prerequisites, then order them so
/// that every task comes after all of its dependencies.
pub fn build_execution_order(
    edges: &IndexMap<String, Vec<String>>,
    roots: &[String],
) -> Result<Vec<String>, RunError> {
    // Reachable set
    let mut reachable: IndexSet<String> = IndexSet::new();
    let mut pending: Vec<String> = Vec::new();
    for root in roots {
        if !edges.contains_key(root) {
            return Err(RunError::UnknownTask(root.clone()));
        }
        pending.push(root.clone());
    }
    while let Some(id) = pending.pop() {
        if !reachable.insert(id.clone()) {
            continue;
        }
        for dep in &edges[&id] {
            if !edges.contains_key(dep) {
                return Err(RunError::UnknownDependency {
                    task: id.clone(),
                    dep: dep.clone(),
                });
            }
            pending.push(dep.clone());
        }
    }

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for id in &reachable {
        let deps: HashSet<&str> = edges[id].iter().map(String::as_str).collect();
        in_degree.insert(id.as_str(), deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(id.as_str());
        }
    }

    // Kahn's algorithm with sorted tie-breaking
    let mut zero_degree: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    zero_degree.sort_unstable();
    let mut queue: VecDeque<&str> = zero_degree.into_iter().collect();

    let mut order = Vec::new();
    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());

        let mut next_ready: Vec<&str> = Vec::new();
        if let Some(neighbors) = dependents.get(current) {
            for neighbor in neighbors {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(*neighbor);
                    }
                }
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != reachable.len() {
        let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
        let mut cycle_members: Vec<&str> = reachable
            .iter()
            .map(String::as_str)
            .filter(|id| !ordered.contains(id))
            .collect();
        cycle_members.sort_unstable();
        return Err(RunError::Cycle(cycle_members.join(", ")));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_config;

    fn resolve_yaml(yaml: &str) -> ResolvedGraph {
        resolve(&parse_config(yaml).unwrap()).unwrap()
    }

    fn deps(graph: &ResolvedGraph, id: &str) -> Vec<String> {
        graph.tasks[id].deps.clone()
    }

    #[test]
    fn test_sd003_single_target() {
        let graph = resolve_yaml(
            r#"
inputs:
  app: web
targets:
  web: [transpile, "copy: transpile"]
"#,
        );
        assert_eq!(
            graph.tasks.keys().collect::<Vec<_>>(),
            vec!["transpile-app", "copy-app"]
        );
        assert!(deps(&graph, "transpile-app").is_empty());
        assert_eq!(deps(&graph, "copy-app"), vec!["transpile-app"]);
        assert_eq!(graph.defaults["app"], vec!["transpile-app"]);
        assert!(graph.groups.is_empty());
        assert_eq!(graph.recipe_tasks["copy"], vec!["copy-app"]);
    }

    #[test]
    fn test_sd003_multiple_targets_group() {
        let graph = resolve_yaml(
            r#"
inputs:
  app: ["web: w1", "mobile: w2"]
targets:
  web: [build, "lint"]
  mobile: [build]
"#,
        );
        assert!(graph.tasks.contains_key("build-app-web"));
        assert!(graph.tasks.contains_key("build-app-mobile"));
        assert!(graph.tasks.contains_key("lint-app-web"));
        assert_eq!(
            graph.groups["build-app"],
            vec!["build-app-web", "build-app-mobile"]
        );
        // single-member groups are not registered
        assert!(!graph.groups.contains_key("lint-app"));
        assert_eq!(
            graph.defaults["app"],
            vec!["build-app-web", "build-app-mobile"]
        );
        assert_eq!(graph.tasks["build-app-web"].dest, PathBuf::from("w1/app"));
        assert_eq!(graph.tasks["build-app-mobile"].dest, PathBuf::from("w2/app"));
    }

    #[test]
    fn test_sd003_suffixed_dependencies() {
        let graph = resolve_yaml(
            r#"
inputs:
  app: [web, mobile]
targets:
  web: [transpile, "copy: transpile"]
  mobile: [transpile]
"#,
        );
        assert_eq!(deps(&graph, "copy-app-web"), vec!["transpile-app-web"]);
    }

    #[test]
    fn test_sd003_dependency_only_task() {
        let graph = resolve_yaml(
            r#"
inputs:
  app: web
targets:
  web: [lint, "[watch]: lint", "serve: watch"]
"#,
        );
        let watch = &graph.tasks["watch-app"];
        assert!(watch.is_dependency_only());
        assert_eq!(watch.deps, vec!["lint-app"]);
        assert_eq!(deps(&graph, "serve-app"), vec!["lint-app"]);
        assert!(!graph.recipe_tasks.contains_key("watch"));
    }

    #[test]
    fn test_sd003_flatten_in_place() {
        let graph = resolve_yaml(
            r#"
inputs:
  app: web
targets:
  web: [a, b, c, "[both]: a : b", "d: c : both : c"]
"#,
        );
        assert_eq!(deps(&graph, "d-app"), vec!["c-app", "a-app", "b-app"]);
    }

    #[test]
    fn test_sd003_flatten_transitive_any_order() {
        // `outer` references `inner` before `inner` is declared
        let graph = resolve_yaml(
            r#"
inputs:
  app: web
targets:
  web: [x, "top: outer", "[outer]: inner", "[inner]: x"]
"#,
        );
        assert_eq!(deps(&graph, "top-app"), vec!["x-app"]);
        assert_eq!(deps(&graph, "outer-app"), vec!["x-app"]);
    }

    #[test]
    fn test_sd003_dependency_only_cycle() {
        let config = parse_config(
            r#"
inputs:
  app: web
targets:
  web: ["[a]: b", "[b]: a"]
"#,
        )
        .unwrap();
        let err = resolve(&config).unwrap_err();
        assert!(matches!(err, ConfigError::DependencyCycle(_)));
    }

    #[test]
    fn test_sd003_paths_and_options() {
        let graph = resolve_yaml(
            r#"
src: source
dest: build
inputs:
  app: web
  site: "web: public"
targets:
  web: [copy]
options:
  "*": {src: "**/*"}
  copy-site: {src: static}
"#,
        );
        let app = &graph.tasks["copy-app"];
        assert_eq!(app.src_dir, PathBuf::from("source/app"));
        assert_eq!(app.src, PathBuf::from("source/app/**/*"));
        assert_eq!(app.dest, PathBuf::from("build/app"));
        let site = &graph.tasks["copy-site"];
        assert_eq!(site.src, PathBuf::from("source/site/static"));
        assert_eq!(site.dest, PathBuf::from("public/site"));
        assert_eq!(site.dest_root, PathBuf::from("public"));
    }

    #[test]
    fn test_sd003_dependency_only_default_and_group() {
        let graph = resolve_yaml(
            r#"
inputs:
  app: [web, mobile]
targets:
  web: ["[watch]: lint", lint]
  mobile: ["[watch]: lint", lint]
"#,
        );
        assert!(graph.tasks["watch-app-web"].is_dependency_only());
        assert_eq!(
            graph.defaults["app"],
            vec!["lint-app-web", "lint-app-mobile"]
        );
        assert_eq!(
            graph.groups["watch-app"],
            vec!["lint-app-web", "lint-app-mobile"]
        );
        assert_eq!(
            graph.groups["lint-app"],
            vec!["lint-app-web", "lint-app-mobile"]
        );
    }

    #[test]
    fn test_sd003_empty_dependency_only_default() {
        let graph = resolve_yaml("inputs:\n  app: web\ntargets:\n  web: [\"[idle]\", copy]\n");
        assert!(graph.defaults["app"].is_empty());
    }

    #[test]
    fn test_sd003_src_option_nests_under_unit() {
        let graph = resolve_yaml(
            r#"
src: lib
inputs:
  app: web
targets:
  web: [copy, pug, less]
options:
  copy: {src: /abs}
  pug: {src: ../shared/views}
  less: {src: ./styles/../css}
"#,
        );
        assert_eq!(graph.tasks["copy-app"].src, PathBuf::from("lib/app/abs"));
        assert_eq!(graph.tasks["pug-app"].src, PathBuf::from("lib/shared/views"));
        assert_eq!(graph.tasks["less-app"].src, PathBuf::from("lib/app/css"));
    }

    #[test]
    fn test_sd003_unknown_range() {
        let config = parse_config("inputs:\n  app: web\n").unwrap();
        let err = resolve(&config).unwrap_err();
        match err {
            ConfigError::UnknownRange { unit, range, .. } => {
                assert_eq!(unit, "app");
                assert_eq!(range, "web");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_sd003_reserved_names() {
        for yaml in [
            "inputs:\n  install: web\ntargets:\n  web: [copy]\n",
            "aliases:\n  install: [copy-app]\n",
            "targets:\n  web: [install]\n",
        ] {
            let config = parse_config(yaml).unwrap();
            assert!(matches!(
                resolve(&config),
                Err(ConfigError::ReservedName { .. })
            ));
        }
    }

    #[test]
    fn test_sd003_execution_order_linear() {
        let edges: IndexMap<String, Vec<String>> = IndexMap::from([
            ("c".to_string(), vec!["b".to_string()]),
            ("b".to_string(), vec!["a".to_string()]),
            ("a".to_string(), vec![]),
            ("unrelated".to_string(), vec![]),
        ]);
        let order = build_execution_order(&edges, &["c".to_string()]).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sd003_execution_order_diamond() {
        let edges: IndexMap<String, Vec<String>> = IndexMap::from([
            ("bottom".to_string(), vec!["right".to_string(), "left".to_string()]),
            ("left".to_string(), vec!["top".to_string()]),
            ("right".to_string(), vec!["top".to_string()]),
            ("top".to_string(), vec![]),
        ]);
        let order = build_execution_order(&edges, &["bottom".to_string()]).unwrap();
        assert_eq!(order, vec!["top", "left", "right", "bottom"]);
    }

    #[test]
    fn test_sd003_execution_order_duplicate_edges() {
        let edges: IndexMap<String, Vec<String>> = IndexMap::from([
            ("b".to_string(), vec!["a".to_string(), "a".to_string()]),
            ("a".to_string(), vec![]),
        ]);
        let order = build_execution_order(&edges, &["b".to_string()]).unwrap();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn test_sd003_execution_order_errors() {
        let edges: IndexMap<String, Vec<String>> = IndexMap::from([
            ("a".to_string(), vec!["b".to_string()]),
            ("b".to_string(), vec!["a".to_string()]),
            ("c".to_string(), vec!["ghost".to_string()]),
        ]);
        assert!(matches!(
            build_execution_order(&edges, &["a".to_string()]),
            Err(RunError::Cycle(_))
        ));
        assert!(matches!(
            build_execution_order(&edges, &["c".to_string()]),
            Err(RunError::UnknownDependency { .. })
        ));
        assert!(matches!(
            build_execution_order(&edges, &["zzz".to_string()]),
            Err(RunError::UnknownTask(_))
        ));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn name() -> impl Strategy<Value = String> {
            "[a-z]{1,6}"
        }

        /// Units with 1..3 targets over a shared pool of ranges whose
        /// invocations depend on earlier invocations, some dependency-only.
        fn config() -> impl Strategy<Value = SodaConfig> {
            let ranges = proptest::collection::vec(
                proptest::collection::vec((name(), any::<bool>(), any::<u8>()), 1..5),
                1..4,
            );
            let units = proptest::collection::vec((name(), proptest::collection::vec(any::<u8>(), 1..4)), 1..4);
            (ranges, units).prop_map(|(ranges, units)| {
                let mut config = SodaConfig::default();
                for (r, invocations) in ranges.iter().enumerate() {
                    let mut seen: Vec<String> = Vec::new();
                    let mut specs = Vec::new();
                    for (recipe, empty, dep) in invocations {
                        if seen.contains(recipe) || recipe == RESERVED_TASK {
                            continue;
                        }
                        let head = if *empty {
                            format!("[{}]", recipe)
                        } else {
                            recipe.clone()
                        };
                        let spec = match seen.get(*dep as usize % (seen.len() + 1)) {
                            Some(d) => format!("{}: {}", head, d),
                            None => head,
                        };
                        seen.push(recipe.clone());
                        specs.push(spec);
                    }
                    config.targets.insert(format!("r{}", r), specs);
                }
                for (unit, picks) in units {
                    if unit == RESERVED_TASK {
                        continue;
                    }
                    let mut targets: Vec<String> = picks
                        .iter()
                        .map(|p| format!("r{}", *p as usize % ranges.len()))
                        .collect();
                    targets.dedup();
                    let spec = if targets.len() == 1 {
                        TargetSpec::Single(targets.remove(0))
                    } else {
                        TargetSpec::Multiple(targets)
                    };
                    config.inputs.insert(unit, spec);
                }
                config
            })
        }

        proptest! {
            #[test]
            fn test_sd003_prop_naming_and_flattening(config in config()) {
                let graph = resolve(&config).unwrap();
                for (unit, spec) in &config.inputs {
                    let multiple = spec.len() > 1;
                    for task in graph.tasks.values().filter(|t| &t.unit == unit) {
                        let base = task_base_name(&task.recipe, unit);
                        if multiple {
                            prop_assert_eq!(&task.id, &format!("{}-{}", base, task.range));
                        } else {
                            prop_assert_eq!(&task.id, &base);
                        }
                    }
                }
                for task in graph.tasks.values() {
                    for dep in &task.deps {
                        let target = graph.tasks.get(dep);
                        prop_assert!(target.map_or(true, |t| !t.is_dependency_only()));
                    }
                }
                let listed = graph.defaults.values().chain(graph.groups.values());
                for id in listed.flatten() {
                    let task = graph.tasks.get(id);
                    prop_assert!(task.is_some_and(|t| !t.is_dependency_only()));
                }
            }
        }
    }
}
