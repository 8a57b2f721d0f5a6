//! Per-test-case aggregate of results, assertions and timers.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use tally_wire::{Category, ComparisonRule, Message, Metadata, MetricRecord, ResultRecord, Value};

use crate::error::{Error, Result};

/// One keyed result held by a [`Case`]
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEntry {
    pub value: Value,
    pub category: Category,
    pub rule: Option<ComparisonRule>,
}

impl ResultEntry {
    fn check(value: Value) -> Self {
        Self {
            value,
            category: Category::Check,
            rule: None,
        }
    }
}

/// Everything captured for one test case during one run.
///
/// Mutators take `&mut self`; the client wraps each case in its own
/// mutex so calls against one case are serialized.
#[derive(Debug, Clone)]
pub struct Case {
    metadata: Metadata,
    results: BTreeMap<String, ResultEntry>,
    tics: BTreeMap<String, i64>,
    tocs: BTreeMap<String, i64>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl Case {
    /// Create an empty case bound to `team/suite/version`.
    pub fn new(
        testcase: impl Into<String>,
        team: impl Into<String>,
        suite: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            metadata: Metadata {
                teamslug: team.into(),
                testsuite: suite.into(),
                version: version.into(),
                testcase: testcase.into(),
                built_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            },
            results: BTreeMap::new(),
            tics: BTreeMap::new(),
            tocs: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.testcase
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Read-only view of the stored results
    pub fn results(&self) -> &BTreeMap<String, ResultEntry> {
        &self.results
    }

    pub fn get(&self, key: &str) -> Option<&ResultEntry> {
        self.results.get(key)
    }

    /// Store a checked value; replaces whatever `key` held.
    pub fn add_result(&mut self, key: impl Into<String>, value: Value) {
        self.results.insert(key.into(), ResultEntry::check(value));
    }

    /// Store a checked value with a comparison rule.
    ///
    /// The rule is only encoded when `value` is a `Decimal`.
    pub fn add_result_with_rule(
        &mut self,
        key: impl Into<String>,
        value: Value,
        rule: ComparisonRule,
    ) {
        self.results.insert(
            key.into(),
            ResultEntry {
                value,
                category: Category::Check,
                rule: Some(rule),
            },
        );
    }

    /// Store an assertion; replaces whatever `key` held.
    pub fn add_assertion(&mut self, key: impl Into<String>, value: Value) {
        self.results.insert(
            key.into(),
            ResultEntry {
                value,
                category: Category::Assert,
                rule: None,
            },
        );
    }

    /// Append `value` to the array under `key`, creating it if absent.
    pub fn add_array_element(&mut self, key: &str, value: Value) -> Result<()> {
        match self.results.get_mut(key) {
            None => {
                self.results
                    .insert(key.to_string(), ResultEntry::check(Value::Array(vec![value])));
                Ok(())
            }
            Some(ResultEntry {
                value: Value::Array(items),
                category: Category::Check,
                ..
            }) => {
                items.push(value);
                Ok(())
            }
            Some(entry) => Err(Error::type_conflict(
                key,
                format!(
                    "expected a checked array, found {} {}",
                    entry.category.as_str(),
                    entry.value.kind()
                ),
            )),
        }
    }

    /// Increment the counter under `key`, starting at 1.
    pub fn add_hit_count(&mut self, key: &str) -> Result<()> {
        match self.results.get_mut(key) {
            None => {
                self.results
                    .insert(key.to_string(), ResultEntry::check(Value::Integer(1)));
                Ok(())
            }
            Some(ResultEntry {
                value: Value::Integer(n),
                category: Category::Check,
                ..
            }) => {
                *n = n.saturating_add(1);
                Ok(())
            }
            Some(ResultEntry {
                value: Value::Decimal(d),
                category: Category::Check,
                ..
            }) => {
                *d += 1.0;
                Ok(())
            }
            Some(entry) => Err(Error::type_conflict(
                key,
                format!(
                    "expected a checked number, found {} {}",
                    entry.category.as_str(),
                    entry.value.kind()
                ),
            )),
        }
    }

    pub fn start_timer(&mut self, key: impl Into<String>) {
        self.tics.insert(key.into(), now_ms());
    }

    /// Record the end of a timer. Ignored when the timer was never started.
    pub fn stop_timer(&mut self, key: &str) {
        if self.tics.contains_key(key) {
            self.tocs.insert(key.to_string(), now_ms());
        }
    }

    /// Record an externally measured duration.
    pub fn add_metric(&mut self, key: impl Into<String>, duration_ms: i64) {
        let key = key.into();
        let tic = now_ms();
        self.tics.insert(key.clone(), tic);
        self.tocs.insert(key, tic.saturating_add(duration_ms));
    }

    /// Durations for every timer that has both a start and a stop.
    pub fn metrics(&self) -> Vec<MetricRecord> {
        self.tics
            .iter()
            .filter_map(|(key, tic)| {
                self.tocs.get(key).map(|toc| MetricRecord {
                    key: key.clone(),
                    value: toc - tic,
                })
            })
            .collect()
    }

    /// Snapshot the case as a wire message.
    pub fn to_message(&self) -> Message {
        Message {
            metadata: self.metadata.clone(),
            results: self
                .results
                .iter()
                .map(|(key, entry)| ResultRecord {
                    key: key.clone(),
                    value: entry.value.clone(),
                    category: entry.category,
                    rule: entry.rule,
                })
                .collect(),
            metrics: self.metrics(),
        }
    }

    pub fn to_binary(&self) -> Vec<u8> {
        self.to_message().to_bytes()
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.to_message().to_json()
    }
}
