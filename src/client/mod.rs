//! Capture client
//!
//! Owns the configuration, the registry of test cases, and the active case
//! resolution. All capture calls act on the active case of the calling
//! thread; with no active case they are ignored.
//!
//! Lock discipline: at most one of the client's locks is held at a time,
//! and a case's own mutex is only taken after the registry lock is
//! released.

mod active;
mod submit;

pub use submit::SubmitStatus;

use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tally_wire::{schema, ComparisonRule, Value};
use tracing::{debug, info};

use crate::case::Case;
use crate::config::{ClientOptions, ResolvedOptions};
use crate::error::{Error, Result};
use crate::transform::{Adapted, Capturable, Transformer};
use crate::transport::{HttpTransport, Transport};

use active::ActiveCase;

#[derive(Default)]
struct ClientState {
    options: Option<ResolvedOptions>,
    transport: Option<Arc<dyn Transport>>,
}

/// Shared handle to a registered test case
pub type CaseHandle = Arc<Mutex<Case>>;

/// Entry point for capturing test results.
pub struct Client {
    state: RwLock<ClientState>,
    cases: Mutex<HashMap<String, CaseHandle>>,
    active: Mutex<ActiveCase>,
    transformer: RwLock<Transformer>,
    transport: Option<Arc<dyn Transport>>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Client {
    /// Create an unconfigured client that talks HTTP once online.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ClientState::default()),
            cases: Mutex::new(HashMap::new()),
            active: Mutex::new(ActiveCase::default()),
            transformer: RwLock::new(Transformer::default()),
            transport: None,
        }
    }

    /// Create an unconfigured client that uses `transport` instead of HTTP.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport: Some(transport),
            ..Self::new()
        }
    }

    /// Apply `options` on top of the built-in defaults and the options
    /// currently in effect.
    ///
    /// Validation and the API key handshake run before anything changes:
    /// on error the previous configuration stays in place.
    pub fn configure(&self, options: ClientOptions) -> Result<()> {
        let previous = self.options();
        let mut layers = Vec::with_capacity(2);
        if let Some(previous) = &previous {
            layers.push(previous.to_options());
        }
        layers.push(options);
        let resolved = ClientOptions::layered(&layers)?.resolve()?;

        let transport = if resolved.is_online() {
            let transport = self.connect(&resolved)?;
            submit::handshake(transport.as_ref())?;
            Some(transport)
        } else {
            None
        };

        let online = transport.is_some();
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.transport = transport;
            state.options = Some(resolved.clone());
        }
        self.transformer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_reflection(resolved.reflection);
        if previous.map(|p| p.concurrency) != Some(resolved.concurrency) {
            *lock(&self.active) = ActiveCase::new(resolved.concurrency);
        }

        info!(
            team = %resolved.team,
            suite = %resolved.suite,
            version = %resolved.version,
            online,
            "client configured"
        );
        Ok(())
    }

    fn connect(&self, options: &ResolvedOptions) -> Result<Arc<dyn Transport>> {
        if let Some(transport) = &self.transport {
            return Ok(Arc::clone(transport));
        }
        match (&options.api_url, &options.api_key) {
            (Some(url), Some(key)) => Ok(Arc::new(HttpTransport::new(url, key)?)),
            _ => Err(Error::Configuration(
                "api_url and api_key are required to go online".to_string(),
            )),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .options
            .is_some()
    }

    /// Whether submit, seal and the test case listing are available
    pub fn is_online(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .transport
            .is_some()
    }

    /// Options currently in effect
    pub fn options(&self) -> Option<ResolvedOptions> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .options
            .clone()
    }

    /// Register an adapter used whenever a `T` is captured.
    pub fn add_adapter<T, F>(&self, adapter: F)
    where
        T: Any,
        F: Fn(&T) -> Adapted + Send + Sync + 'static,
    {
        self.transformer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_adapter::<T, F>(adapter);
    }

    /// Create the case `name` if needed and make it the active case.
    ///
    /// Declaring an existing name keeps its results.
    pub fn declare_testcase(&self, name: &str) -> Result<CaseHandle> {
        let options = self
            .options()
            .ok_or_else(|| Error::NotConfigured("declare_testcase".to_string()))?;

        let case = {
            let mut cases = lock(&self.cases);
            Arc::clone(cases.entry(name.to_string()).or_insert_with(|| {
                debug!(testcase = name, "declaring test case");
                Arc::new(Mutex::new(Case::new(
                    name,
                    &options.team,
                    &options.suite,
                    &options.version,
                )))
            }))
        };
        lock(&self.active).set(name);
        Ok(case)
    }

    /// Drop the case `name` from memory. Does nothing when it is unknown.
    pub fn forget_testcase(&self, name: &str) {
        let removed = lock(&self.cases).remove(name).is_some();
        lock(&self.active).clear(name);
        if removed {
            debug!(testcase = name, "forgot test case");
        }
    }

    /// Registered case by name
    pub fn testcase(&self, name: &str) -> Option<CaseHandle> {
        lock(&self.cases).get(name).cloned()
    }

    /// Names of all registered cases, sorted
    pub fn testcase_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.cases).keys().cloned().collect();
        names.sort();
        names
    }

    fn active_case(&self, op: &str) -> Option<CaseHandle> {
        let name = lock(&self.active).current().map(str::to_owned);
        let Some(name) = name else {
            debug!(op, "no active test case, ignoring");
            return None;
        };
        let case = self.testcase(&name);
        if case.is_none() {
            debug!(op, testcase = %name, "active test case is not registered, ignoring");
        }
        case
    }

    fn transform<T: Capturable + ?Sized>(&self, value: &T) -> Result<Value> {
        Ok(self
            .transformer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .transform(value)?)
    }

    /// Capture `value` under `key` as a checked result.
    pub fn check<T: Capturable + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let Some(case) = self.active_case("check") else {
            return Ok(());
        };
        let value = self.transform(value)?;
        lock(&case).add_result(key, value);
        Ok(())
    }

    /// Capture `value` with a comparison rule for decimal results.
    pub fn check_with_rule<T: Capturable + ?Sized>(
        &self,
        key: &str,
        value: &T,
        rule: ComparisonRule,
    ) -> Result<()> {
        let Some(case) = self.active_case("check_with_rule") else {
            return Ok(());
        };
        let value = self.transform(value)?;
        lock(&case).add_result_with_rule(key, value, rule);
        Ok(())
    }

    /// Capture `value` under `key` as an assertion.
    pub fn assume<T: Capturable + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let Some(case) = self.active_case("assume") else {
            return Ok(());
        };
        let value = self.transform(value)?;
        lock(&case).add_assertion(key, value);
        Ok(())
    }

    /// Append `value` to the array under `key`.
    pub fn add_array_element<T: Capturable + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let Some(case) = self.active_case("add_array_element") else {
            return Ok(());
        };
        let value = self.transform(value)?;
        let appended = lock(&case).add_array_element(key, value);
        appended
    }

    /// Increment the counter under `key`.
    pub fn add_hit_count(&self, key: &str) -> Result<()> {
        let Some(case) = self.active_case("add_hit_count") else {
            return Ok(());
        };
        let counted = lock(&case).add_hit_count(key);
        counted
    }

    pub fn start_timer(&self, key: &str) {
        if let Some(case) = self.active_case("start_timer") {
            lock(&case).start_timer(key);
        }
    }

    pub fn stop_timer(&self, key: &str) {
        if let Some(case) = self.active_case("stop_timer") {
            lock(&case).stop_timer(key);
        }
    }

    /// Record an externally measured duration in milliseconds.
    pub fn add_metric(&self, key: &str, duration_ms: i64) {
        if let Some(case) = self.active_case("add_metric") {
            lock(&case).add_metric(key, duration_ms);
        }
    }

    /// Start the timer `key`; it stops when the guard is dropped.
    ///
    /// The guard stays bound to the case that was active when it started.
    pub fn scoped_timer(&self, key: &str) -> ScopedTimer {
        let case = self.active_case("scoped_timer");
        if let Some(case) = &case {
            lock(case).start_timer(key);
        }
        ScopedTimer {
            case,
            key: key.to_string(),
        }
    }

    fn select(&self, names: Option<&[&str]>) -> Vec<CaseHandle> {
        let cases = lock(&self.cases);
        let mut selected: Vec<(&String, &CaseHandle)> = match names {
            Some(names) => cases
                .iter()
                .filter(|(name, _)| names.contains(&name.as_str()))
                .collect(),
            None => cases.iter().collect(),
        };
        selected.sort_by(|a, b| a.0.cmp(b.0));
        selected.into_iter().map(|(_, case)| Arc::clone(case)).collect()
    }

    /// Binary message buffers for all cases, or only those in `names`.
    pub(crate) fn encode_cases(&self, names: Option<&[&str]>) -> Vec<Vec<u8>> {
        self.select(names)
            .iter()
            .map(|case| lock(case).to_binary())
            .collect()
    }

    /// Write a `Messages` envelope holding the selected cases to `path`.
    pub fn save_binary(&self, path: &Path, names: Option<&[&str]>) -> Result<()> {
        let envelope = schema::encode_messages(&self.encode_cases(names));
        write_creating_dirs(path, &envelope)?;
        debug!(path = %path.display(), bytes = envelope.len(), "saved binary results");
        Ok(())
    }

    /// Write the selected cases to `path` as a JSON array.
    pub fn save_json(&self, path: &Path, names: Option<&[&str]>) -> Result<()> {
        let documents: Vec<serde_json::Value> = self
            .select(names)
            .iter()
            .map(|case| lock(case).to_json())
            .collect();
        let rendered = serde_json::to_string_pretty(&documents)?;
        write_creating_dirs(path, rendered.as_bytes())?;
        debug!(path = %path.display(), cases = documents.len(), "saved json results");
        Ok(())
    }
}

fn write_creating_dirs(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, contents)?;
    Ok(())
}

/// Guard returned by [`Client::scoped_timer`]
#[must_use = "the timer stops as soon as the guard is dropped"]
pub struct ScopedTimer {
    case: Option<CaseHandle>,
    key: String,
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        if let Some(case) = &self.case {
            lock(case).stop_timer(&self.key);
        }
    }
}
