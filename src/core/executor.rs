//! SD-011: In-process task runner.
//!
//! Runs a requested task's transitive prerequisites in topological order:
//! register → order (Kahn) → for each task: body → wait on pending → record.
//! A failed task blocks its dependents; unrelated tasks keep running unless
//! `fail_fast` is set.

use super::error::{error_chain, RunError};
use super::recipe::Completion;
use super::registrar::{TaskBody, TaskRunner};
use super::resolver::build_execution_order;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

struct Entry {
    deps: Vec<String>,
    body: Option<TaskBody>,
}

/// Registry of tasks that can be run by name.
#[derive(Default)]
pub struct Runner {
    tasks: IndexMap<String, Entry>,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TaskRunner for Runner {
    fn task(&mut self, name: &str, deps: Vec<String>, body: Option<TaskBody>) {
        let previous = self.tasks.insert(name.to_string(), Entry { deps, body });
        if previous.is_some() {
            tracing::debug!(task = name, "task re-registered, replacing earlier definition");
        }
    }
}

/// Run settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Order tasks without running any body
    pub dry_run: bool,
    /// Stop after the first failure instead of running unrelated tasks
    pub fail_fast: bool,
}

/// What happened to one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Would have run; recorded by dry runs
    Planned,
    /// Only aggregates dependencies
    Aggregated,
    Skipped { blocked_by: String },
    Failed { error: String },
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Completed => write!(f, "ok"),
            TaskOutcome::Planned => write!(f, "planned"),
            TaskOutcome::Aggregated => write!(f, "-"),
            TaskOutcome::Skipped { blocked_by } => write!(f, "skipped (blocked by {})", blocked_by),
            TaskOutcome::Failed { error } => write!(f, "FAILED: {}", error),
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Outcomes in execution order
    pub outcomes: IndexMap<String, TaskOutcome>,
    pub duration: Duration,
}

impl RunReport {
    pub fn failed(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, TaskOutcome::Failed { .. }))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn completed(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| **o == TaskOutcome::Completed)
            .count()
    }

    /// `Err(RunError::Failed)` when any task failed.
    pub fn into_result(self) -> Result<RunReport, RunError> {
        let failed = self.failed();
        if failed.is_empty() {
            Ok(self)
        } else {
            Err(RunError::Failed(failed))
        }
    }
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn deps(&self, name: &str) -> Option<&[String]> {
        self.tasks.get(name).map(|e| e.deps.as_slice())
    }

    /// Execution order for `roots` and everything they depend on.
    pub fn plan(&self, roots: &[String]) -> Result<Vec<String>, RunError> {
        let edges: IndexMap<String, Vec<String>> = self
            .tasks
            .iter()
            .map(|(name, entry)| (name.clone(), entry.deps.clone()))
            .collect();
        build_execution_order(&edges, roots)
    }

    /// Run `roots` and their prerequisites.
    pub fn run(&self, roots: &[String], opts: RunOptions) -> Result<RunReport, RunError> {
        let start = Instant::now();
        let order = self.plan(roots)?;
        let mut report = RunReport::default();
        let mut broken: HashSet<String> = HashSet::new();

        for id in &order {
            let entry = &self.tasks[id];

            if let Some(blocker) = entry.deps.iter().find(|d| broken.contains(*d)) {
                let blocked_by = match report.outcomes.get(blocker) {
                    Some(TaskOutcome::Skipped { blocked_by }) => blocked_by.clone(),
                    _ => blocker.clone(),
                };
                tracing::warn!(task = %id, "skipped, blocked by failed task '{}'", blocked_by);
                broken.insert(id.clone());
                report
                    .outcomes
                    .insert(id.clone(), TaskOutcome::Skipped { blocked_by });
                continue;
            }

            let Some(body) = entry.body.as_ref() else {
                report.outcomes.insert(id.clone(), TaskOutcome::Aggregated);
                continue;
            };
            if opts.dry_run {
                tracing::info!(task = %id, "would run");
                report.outcomes.insert(id.clone(), TaskOutcome::Planned);
                continue;
            }

            let task_start = Instant::now();
            tracing::info!(task = %id, "starting");
            match run_body(body) {
                Ok(()) => {
                    tracing::info!(
                        task = %id,
                        "finished after {:.2}s",
                        task_start.elapsed().as_secs_f64()
                    );
                    report.outcomes.insert(id.clone(), TaskOutcome::Completed);
                }
                Err(error) => {
                    tracing::error!(task = %id, "{}", error);
                    broken.insert(id.clone());
                    report
                        .outcomes
                        .insert(id.clone(), TaskOutcome::Failed { error });
                    if opts.fail_fast {
                        break;
                    }
                }
            }
        }

        report.duration = start.elapsed();
        Ok(report)
    }
}

fn run_body(body: &TaskBody) -> Result<(), String> {
    match body() {
        Ok(Completion::Done) => Ok(()),
        Ok(Completion::Pending(pending)) => pending.wait().map_err(|e| error_chain(&e)),
        Err(e) => Err(error_chain(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{RecipeError, TaskError};
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn ok_body(log: &Log, name: &str) -> Option<TaskBody> {
        let log = Arc::clone(log);
        let name = name.to_string();
        Some(Box::new(move || {
            log.lock().unwrap().push(name.clone());
            Ok(Completion::Done)
        }))
    }

    fn failing_body(log: &Log, name: &str) -> Option<TaskBody> {
        let log = Arc::clone(log);
        let name = name.to_string();
        Some(Box::new(move || {
            log.lock().unwrap().push(name.clone());
            Err(TaskError::Recipe(RecipeError::Failed {
                task: name.clone(),
                message: "boom".to_string(),
            }))
        }))
    }

    fn deps(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sd011_runs_in_dependency_order() {
        let log: Log = Arc::default();
        let mut runner = Runner::new();
        runner.task("copy-app", deps(&["transpile-app"]), ok_body(&log, "copy-app"));
        runner.task("transpile-app", vec![], ok_body(&log, "transpile-app"));
        runner.task("app", deps(&["copy-app"]), None);

        let report = runner.run(&deps(&["app"]), RunOptions::default()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["transpile-app", "copy-app"]);
        assert_eq!(report.completed(), 2);
        assert_eq!(report.outcomes["app"], TaskOutcome::Aggregated);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_sd011_failure_isolation() {
        let log: Log = Arc::default();
        let mut runner = Runner::new();
        runner.task("a", vec![], failing_body(&log, "a"));
        runner.task("b", deps(&["a"]), ok_body(&log, "b"));
        runner.task("c", deps(&["b"]), ok_body(&log, "c"));
        runner.task("d", vec![], ok_body(&log, "d"));
        runner.task("all", deps(&["c", "d"]), None);

        let report = runner.run(&deps(&["all"]), RunOptions::default()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "d"]);
        assert_eq!(
            report.outcomes["c"],
            TaskOutcome::Skipped {
                blocked_by: "a".to_string()
            }
        );
        assert_eq!(report.failed(), vec!["a"]);
        match report.into_result() {
            Err(RunError::Failed(failed)) => assert_eq!(failed, vec!["a"]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_sd011_fail_fast() {
        let log: Log = Arc::default();
        let mut runner = Runner::new();
        runner.task("a", vec![], failing_body(&log, "a"));
        runner.task("b", vec![], ok_body(&log, "b"));
        runner.task("all", deps(&["a", "b"]), None);
        let opts = RunOptions {
            fail_fast: true,
            ..Default::default()
        };
        runner.run(&deps(&["all"]), opts).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_sd011_dry_run_runs_nothing() {
        let log: Log = Arc::default();
        let mut runner = Runner::new();
        runner.task("a", vec![], ok_body(&log, "a"));
        runner.task("all", deps(&["a"]), None);
        let opts = RunOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = runner.run(&deps(&["all"]), opts).unwrap();
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(report.outcomes["a"], TaskOutcome::Planned);
        assert_eq!(report.outcomes["all"], TaskOutcome::Aggregated);
        assert_eq!(report.completed(), 0);
        assert!(report.failed().is_empty());
    }

    #[test]
    fn test_sd011_waits_on_pending() {
        let mut runner = Runner::new();
        runner.task(
            "slow",
            vec![],
            Some(Box::new(|| {
                let handle = std::thread::spawn(|| -> Result<(), RecipeError> {
                    Err(RecipeError::Failed {
                        task: "slow".to_string(),
                        message: "late failure".to_string(),
                    })
                });
                Ok(Completion::Pending(Box::new(handle)))
            })),
        );
        let report = runner.run(&deps(&["slow"]), RunOptions::default()).unwrap();
        match &report.outcomes["slow"] {
            TaskOutcome::Failed { error } => assert!(error.contains("late failure")),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_sd011_unknown_task_and_dependency() {
        let mut runner = Runner::new();
        runner.task("a", deps(&["ghost"]), None);
        assert!(matches!(
            runner.run(&deps(&["nope"]), RunOptions::default()),
            Err(RunError::UnknownTask(_))
        ));
        assert!(matches!(
            runner.plan(&deps(&["a"])),
            Err(RunError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_sd011_cycle() {
        let mut runner = Runner::new();
        runner.task("a", deps(&["b"]), None);
        runner.task("b", deps(&["a"]), None);
        match runner.plan(&deps(&["a"])) {
            Err(RunError::Cycle(members)) => assert_eq!(members, "a, b"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_sd011_reregistration_replaces() {
        let log: Log = Arc::default();
        let mut runner = Runner::new();
        runner.task("a", vec![], ok_body(&log, "first"));
        runner.task("a", vec![], ok_body(&log, "second"));
        runner.run(&deps(&["a"]), RunOptions::default()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["second"]);
        assert_eq!(runner.names().count(), 1);
    }
}
