//! Active test case resolution

use std::collections::HashMap;
use std::thread::{self, ThreadId};

/// Which test case capture calls land in.
///
/// Chosen once per configuration: `Shared` when concurrency is enabled,
/// `PerThread` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ActiveCase {
    /// One active case for every thread
    Shared(Option<String>),
    /// Each thread has its own active case
    PerThread(HashMap<ThreadId, String>),
}

impl Default for ActiveCase {
    fn default() -> Self {
        ActiveCase::Shared(None)
    }
}

impl ActiveCase {
    pub(crate) fn new(concurrency: bool) -> Self {
        if concurrency {
            ActiveCase::Shared(None)
        } else {
            ActiveCase::PerThread(HashMap::new())
        }
    }

    pub(crate) fn is_shared(&self) -> bool {
        matches!(self, ActiveCase::Shared(_))
    }

    /// Make `name` active for the calling thread (or everyone, when shared).
    pub(crate) fn set(&mut self, name: &str) {
        match self {
            ActiveCase::Shared(active) => *active = Some(name.to_string()),
            ActiveCase::PerThread(map) => {
                map.insert(thread::current().id(), name.to_string());
            }
        }
    }

    /// The active case for the calling thread
    pub(crate) fn current(&self) -> Option<&str> {
        match self {
            ActiveCase::Shared(active) => active.as_deref(),
            ActiveCase::PerThread(map) => map.get(&thread::current().id()).map(String::as_str),
        }
    }

    /// Drop every reference to `name`.
    pub(crate) fn clear(&mut self, name: &str) {
        match self {
            ActiveCase::Shared(active) => {
                if active.as_deref() == Some(name) {
                    *active = None;
                }
            }
            ActiveCase::PerThread(map) => map.retain(|_, active| active != name),
        }
    }
}
