//! Workflow execution
//!
//! Runs each workflow's callback once per test case, in order:
//! 1. Skip the case when results already exist and overwrite is off
//! 2. Declare the case and run the callback, containing errors and panics
//! 3. Save local artifacts, then submit when online
//! 4. Forget the case
//!
//! After the last case of a workflow the version is sealed when online.

mod status;
mod summary;

pub use status::{CaseState, InvalidTransition};
pub use summary::{CaseOutcome, RunSummary, RUN_SUMMARY_SCHEMA_VERSION};

use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::ClientOptions;
use crate::error::{Error, Result};

use status::CaseTracker;

/// Binary artifact written per test case
pub const BINARY_ARTIFACT: &str = "tally.bin";

/// JSON artifact written per test case
pub const JSON_ARTIFACT: &str = "tally.json";

/// Error type workflow callbacks may return
pub type WorkflowError = Box<dyn std::error::Error + Send + Sync>;

type Callback = dyn Fn(&str, &Client) -> std::result::Result<(), WorkflowError> + Send + Sync;

/// A named suite of test cases and the code that exercises each one
pub struct Workflow {
    suite: String,
    callback: Box<Callback>,
}

impl Workflow {
    /// `callback` receives the test case name and the client to capture into.
    pub fn new<F>(suite: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&str, &Client) -> std::result::Result<(), WorkflowError> + Send + Sync + 'static,
    {
        Self {
            suite: suite.into(),
            callback: Box::new(callback),
        }
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }
}

/// Options controlling a run
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Options applied to the client before each workflow
    pub client: ClientOptions,
    /// Root of `<suite>/<version>/<testcase>/` artifact directories
    pub output_dir: PathBuf,
    pub save_binary: bool,
    pub save_json: bool,
    /// Re-run cases whose artifacts already exist
    pub overwrite: bool,
    /// Test cases to run; empty means ask the server
    pub testcases: Vec<String>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            client: ClientOptions::default(),
            output_dir: PathBuf::from("results"),
            save_binary: true,
            save_json: false,
            overwrite: false,
            testcases: Vec::new(),
        }
    }
}

/// Drives workflows through a client
pub struct Runner<'a> {
    client: &'a Client,
    options: RunnerOptions,
}

impl<'a> Runner<'a> {
    pub fn new(client: &'a Client, options: RunnerOptions) -> Self {
        Self { client, options }
    }

    /// Run every workflow in order.
    ///
    /// Per-case failures are recorded in the summary; only configuration
    /// and test case listing errors abort the run.
    pub fn run(&self, workflows: &[Workflow]) -> Result<RunSummary> {
        let started = Instant::now();
        let mut outcomes = Vec::new();
        let mut seal_errors = Vec::new();

        for workflow in workflows {
            self.client
                .configure(self.options.client.clone().with_suite(workflow.suite()))?;
            let options = self
                .client
                .options()
                .ok_or_else(|| Error::NotConfigured("run".to_string()))?;

            let testcases = self.testcases()?;
            info!(suite = %options.suite, version = %options.version, count = testcases.len(), "running workflow");

            for name in &testcases {
                let dir = case_dir(&self.options.output_dir, &options.suite, &options.version, name);
                let outcome = self.run_case(workflow, name, dir);
                match outcome.state {
                    CaseState::Fail => warn!(
                        testcase = %name,
                        error = outcome.error.as_deref().unwrap_or_default(),
                        "test case failed"
                    ),
                    state => info!(testcase = %name, %state, duration_ms = outcome.duration_ms, "test case finished"),
                }
                outcomes.push(outcome);
            }

            if self.client.is_online() {
                if let Err(e) = self.client.seal() {
                    warn!(suite = %options.suite, error = %e, "failed to seal version");
                    seal_errors.push(format!("{}/{}: {}", options.suite, options.version, e));
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        Ok(RunSummary::new(outcomes, duration_ms).with_seal_errors(seal_errors))
    }

    fn testcases(&self) -> Result<Vec<String>> {
        if !self.options.testcases.is_empty() {
            return Ok(self.options.testcases.clone());
        }
        if self.client.is_online() {
            return self.client.get_testcases();
        }
        warn!("no test cases given and the client is offline");
        Ok(Vec::new())
    }

    fn run_case(
        &self,
        workflow: &Workflow,
        name: &str,
        dir: std::result::Result<PathBuf, String>,
    ) -> CaseOutcome {
        let mut tracker = CaseTracker::new();
        let outcome = |state: CaseState, duration_ms: u64, error: Option<String>| CaseOutcome {
            suite: workflow.suite.clone(),
            testcase: name.to_string(),
            state,
            duration_ms,
            error,
        };

        let dir = match dir {
            Ok(dir) => dir,
            Err(reason) => {
                advance(&mut tracker, CaseState::Running);
                advance(&mut tracker, CaseState::Fail);
                return outcome(tracker.state(), 0, Some(reason));
            }
        };
        let dir = dir.as_path();

        if !self.options.overwrite && has_artifacts(dir) {
            advance(&mut tracker, CaseState::Skip);
            debug!(testcase = name, "results exist, skipping");
            return outcome(tracker.state(), 0, None);
        }
        advance(&mut tracker, CaseState::Running);

        if dir.exists() {
            if let Err(e) = fs::remove_dir_all(dir) {
                advance(&mut tracker, CaseState::Fail);
                return outcome(
                    tracker.state(),
                    0,
                    Some(format!("cannot clear {}: {}", dir.display(), e)),
                );
            }
        }

        if let Err(e) = self.client.declare_testcase(name) {
            advance(&mut tracker, CaseState::Fail);
            return outcome(tracker.state(), 0, Some(e.to_string()));
        }

        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| (workflow.callback)(name, self.client)));
        let duration_ms = started.elapsed().as_millis() as u64;

        let (state, error) = match result {
            Ok(Ok(())) => match self.complete(name, dir) {
                Ok(state) => (state, None),
                Err(e) => (CaseState::Fail, Some(e.to_string())),
            },
            Ok(Err(e)) => (CaseState::Fail, Some(e.to_string())),
            Err(payload) => (CaseState::Fail, Some(panic_message(payload.as_ref()))),
        };

        self.client.forget_testcase(name);
        advance(&mut tracker, state);
        outcome(tracker.state(), duration_ms, error)
    }

    /// Persist and submit a case whose callback succeeded.
    fn complete(&self, name: &str, dir: &Path) -> Result<CaseState> {
        let only = [name];
        if self.options.save_binary {
            self.client
                .save_binary(&dir.join(BINARY_ARTIFACT), Some(&only))?;
        }
        if self.options.save_json {
            self.client.save_json(&dir.join(JSON_ARTIFACT), Some(&only))?;
        }
        if self.client.is_online() {
            Ok(self.client.post_cases(Some(&only))?.into())
        } else {
            Ok(CaseState::Pass)
        }
    }
}

fn advance(tracker: &mut CaseTracker, state: CaseState) {
    if let Err(e) = tracker.transition(state) {
        warn!(error = %e, "ignoring test case state change");
    }
}

/// Artifact directory of one case, `<output_dir>/<suite>/<version>/<testcase>`.
///
/// The directory is cleared before the case runs, so each segment must be
/// a single plain path component that keeps it under `output_dir`.
fn case_dir(
    output_dir: &Path,
    suite: &str,
    version: &str,
    testcase: &str,
) -> std::result::Result<PathBuf, String> {
    let mut dir = output_dir.to_path_buf();
    for (what, segment) in [("suite", suite), ("version", version), ("test case", testcase)] {
        if !is_plain_component(segment) {
            return Err(format!(
                "invalid {what} name {segment:?}: must be a single path component"
            ));
        }
        dir.push(segment);
    }
    if !dir.starts_with(output_dir) {
        return Err(format!("{} escapes {}", dir.display(), output_dir.display()));
    }
    Ok(dir)
}

fn is_plain_component(segment: &str) -> bool {
    if segment.contains(|c| c == '/' || c == '\\') || segment.contains("..") {
        return false;
    }
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => part.to_str() == Some(segment),
        _ => false,
    }
}

fn has_artifacts(dir: &Path) -> bool {
    dir.join(BINARY_ARTIFACT).is_file() || dir.join(JSON_ARTIFACT).is_file()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(dir: &Path) -> RunnerOptions {
        RunnerOptions {
            client: ClientOptions::new()
                .with_team("acme")
                .with_version("v1")
                .with_offline(true),
            output_dir: dir.to_path_buf(),
            testcases: vec!["alice".to_string(), "bob".to_string()],
            ..RunnerOptions::default()
        }
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| {
            panic!("boom");
        })
        .unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "panicked: boom");
        let payload = panic::catch_unwind(|| {
            panic!("{}", String::from("owned"));
        })
        .unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "panicked: owned");
    }

    #[test]
    fn test_offline_run_passes_and_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new();
        let runner = Runner::new(
            &client,
            RunnerOptions {
                save_json: true,
                ..options(dir.path())
            },
        );
        let workflow = Workflow::new("students", |name, client| {
            client.check("name", name)?;
            Ok(())
        });

        let summary = runner.run(&[workflow]).unwrap();
        assert_eq!(summary.pass, 2);
        assert!(summary.is_success());
        for name in ["alice", "bob"] {
            let case_dir = dir.path().join("students/v1").join(name);
            assert!(case_dir.join(BINARY_ARTIFACT).is_file());
            assert!(case_dir.join(JSON_ARTIFACT).is_file());
        }
        assert!(client.testcase_names().is_empty());
    }

    #[test]
    fn test_failures_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new();
        let runner = Runner::new(
            &client,
            RunnerOptions {
                testcases: vec!["err".into(), "panic".into(), "ok".into()],
                ..options(dir.path())
            },
        );
        let workflow = Workflow::new("students", |name, _client| match name {
            "err" => Err("bad input".into()),
            "panic" => panic!("exploded"),
            _ => Ok(()),
        });

        let summary = runner.run(&[workflow]).unwrap();
        let states: Vec<_> = summary.cases.iter().map(|c| c.state).collect();
        assert_eq!(states, vec![CaseState::Fail, CaseState::Fail, CaseState::Pass]);
        assert_eq!(summary.cases[0].error.as_deref(), Some("bad input"));
        assert_eq!(summary.cases[1].error.as_deref(), Some("panicked: exploded"));
        assert!(!dir.path().join("students/v1/err").join(BINARY_ARTIFACT).exists());
        assert!(client.testcase_names().is_empty());
    }

    #[test]
    fn test_skip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new();
        let workflow = || Workflow::new("students", |_, client| client.check("k", &1).map_err(Into::into));

        let first = Runner::new(&client, options(dir.path())).run(&[workflow()]).unwrap();
        assert_eq!(first.pass, 2);

        let second = Runner::new(&client, options(dir.path())).run(&[workflow()]).unwrap();
        assert_eq!(second.skip, 2);

        let stale = dir.path().join("students/v1/alice/stale.txt");
        fs::write(&stale, "old").unwrap();
        let third = Runner::new(
            &client,
            RunnerOptions {
                overwrite: true,
                ..options(dir.path())
            },
        )
        .run(&[workflow()])
        .unwrap();
        assert_eq!(third.pass, 2);
        assert!(!stale.exists());
    }

    #[test]
    fn test_case_dir_accepts_plain_names() {
        let root = Path::new("/tmp/out");
        assert_eq!(
            case_dir(root, "students", "1.2.0", "alice smith").unwrap(),
            root.join("students/1.2.0/alice smith")
        );
        assert!(is_plain_component("v1.beta"));
    }

    #[test]
    fn test_case_dir_rejects_escaping_names() {
        let root = Path::new("/tmp/out");
        for name in ["", ".", "..", "a/../..", "../x", "a/b", "a\\b", "/etc", "x.."] {
            let err = case_dir(root, "students", "v1", name).unwrap_err();
            assert!(err.contains("test case"), "{name:?}: {err}");
        }
        assert!(case_dir(root, "..", "v1", "alice").unwrap_err().contains("suite"));
        assert!(case_dir(root, "students", "/", "alice").unwrap_err().contains("version"));
    }

    #[test]
    fn test_invalid_name_fails_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new();
        let first = Runner::new(&client, options(dir.path()))
            .run(&[Workflow::new("students", |_, _| Ok(()))])
            .unwrap();
        assert_eq!(first.pass, 2);

        let runner = Runner::new(
            &client,
            RunnerOptions {
                overwrite: true,
                testcases: vec!["..".into(), "".into()],
                ..options(dir.path())
            },
        );
        let summary = runner
            .run(&[Workflow::new("students", |_, _| Ok(()))])
            .unwrap();
        assert_eq!(summary.fail, 2);
        assert!(summary.cases.iter().all(|c| c.error.is_some()));
        assert!(dir.path().join("students/v1/alice").join(BINARY_ARTIFACT).is_file());
        assert!(client.testcase_names().is_empty());
    }

    #[test]
    fn test_offline_without_testcases_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new();
        let runner = Runner::new(
            &client,
            RunnerOptions {
                testcases: Vec::new(),
                ..options(dir.path())
            },
        );
        let summary = runner
            .run(&[Workflow::new("students", |_, _| Ok(()))])
            .unwrap();
        assert_eq!(summary.total(), 0);
    }

    #[test]
    fn test_each_workflow_sets_suite() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new();
        let runner = Runner::new(&client, options(dir.path()));
        let summary = runner
            .run(&[
                Workflow::new("first", |_, _| Ok(())),
                Workflow::new("second", |_, _| Ok(())),
            ])
            .unwrap();
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.cases[2].suite, "second");
        assert!(dir.path().join("second/v1/alice").join(BINARY_ARTIFACT).is_file());
    }

    #[test]
    fn test_missing_version_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new();
        let mut opts = options(dir.path());
        opts.client.version = None;
        let err = Runner::new(&client, opts)
            .run(&[Workflow::new("students", |_, _| Ok(()))])
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
