//! Submission schema
//!
//! Tables (field index in parentheses):
//!
//! - `TypeWrapper { value_type: u8 (0), value: offset (1) }`
//! - `Bool { value (0) }`, `Int { value (0) }`, `String { value (0) }`
//! - `Double { value: f64 (0), rule: ComparisonRule (1) }`
//! - `ComparisonRule { mode (0), max (1), min (2), percent (3) }`
//! - `ObjectMember { name (0), value: TypeWrapper (1) }`
//! - `Object { values: [ObjectMember] (0) }`, `Array { values: [TypeWrapper] (0) }`
//! - `Result { key (0), value: TypeWrapper (1), category: u8 (2) }`
//! - `Results { entries (0) }`, `Metric { key (0), value: i64 (1) }`, `Metrics { entries (0) }`
//! - `Metadata { testsuite (0), version (1), testcase (2), built_at (3), teamslug (4) }`
//! - `Message { metadata (0), results (1), metrics (2), schema_version: u32 (3) }`
//! - `MessageBuffer { buf: [u8] (0) }`, `Messages { messages: [MessageBuffer] (0) }`

use serde::{Deserialize, Serialize};

use crate::builder::{Builder, Offset};
use crate::error::WireError;
use crate::reader::Table;
use crate::rule::ComparisonRule;
use crate::value::{Category, Value};
use crate::{MAX_DEPTH, SCHEMA_VERSION};

type Result<T> = std::result::Result<T, WireError>;

const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_OBJECT: u8 = 5;
const TAG_ARRAY: u8 = 6;

enum TypeWrapperT {}
enum BoolT {}
enum IntT {}
enum DoubleT {}
enum StringT {}
enum RuleT {}
enum MemberT {}
enum ObjectT {}
enum ArrayT {}
enum ResultT {}
enum ResultsT {}
enum MetricT {}
enum MetricsT {}
enum MetadataT {}
enum MessageT {}
enum MessageBufferT {}
enum MessagesT {}

/// Identity of the test case a message belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub teamslug: String,
    pub testsuite: String,
    pub version: String,
    pub testcase: String,
    /// RFC 3339 creation time of the case
    #[serde(rename = "builtAt")]
    pub built_at: String,
}

/// One keyed result
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub key: String,
    pub value: Value,
    pub category: Category,
    /// Only meaningful when `value` is a `Decimal`.
    pub rule: Option<ComparisonRule>,
}

/// One derived duration, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRecord {
    pub key: String,
    pub value: i64,
}

/// Everything captured for a single test case
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub metadata: Metadata,
    pub results: Vec<ResultRecord>,
    pub metrics: Vec<MetricRecord>,
}

fn wrap<U>(b: &mut Builder, tag: u8, inner: Offset<U>) -> Offset<TypeWrapperT> {
    let mut t = b.start_table::<TypeWrapperT>(2);
    t.add_u8(0, tag);
    t.add_offset(1, inner);
    t.finish()
}

fn encode_rule(b: &mut Builder, rule: &ComparisonRule) -> Offset<RuleT> {
    let mut t = b.start_table::<RuleT>(4);
    t.add_u8(0, rule.mode_u8());
    match *rule {
        ComparisonRule::Absolute { min, max } => {
            if let Some(max) = max {
                t.add_f64(1, max);
            }
            if let Some(min) = min {
                t.add_f64(2, min);
            }
        }
        ComparisonRule::Relative { min, percent } => {
            if let Some(min) = min {
                t.add_f64(2, min);
            }
            if let Some(percent) = percent {
                t.add_bool(3, percent);
            }
        }
    }
    t.finish()
}

fn encode_value(b: &mut Builder, value: &Value, rule: Option<&ComparisonRule>) -> Offset<TypeWrapperT> {
    match value {
        Value::Boolean(v) => {
            let mut t = b.start_table::<BoolT>(1);
            t.add_bool(0, *v);
            let inner = t.finish();
            wrap(b, TAG_BOOL, inner)
        }
        Value::Integer(v) => {
            let mut t = b.start_table::<IntT>(1);
            t.add_i64(0, *v);
            let inner = t.finish();
            wrap(b, TAG_INT, inner)
        }
        Value::Decimal(v) => {
            let rule = rule.map(|r| encode_rule(b, r));
            let mut t = b.start_table::<DoubleT>(2);
            t.add_f64(0, *v);
            if let Some(rule) = rule {
                t.add_offset(1, rule);
            }
            let inner = t.finish();
            wrap(b, TAG_DOUBLE, inner)
        }
        Value::String(s) => {
            let s = b.create_string(s);
            let mut t = b.start_table::<StringT>(1);
            t.add_offset(0, s);
            let inner = t.finish();
            wrap(b, TAG_STRING, inner)
        }
        Value::Array(items) => {
            let children: Vec<_> = items.iter().map(|item| encode_value(b, item, None)).collect();
            let children = b.create_vector(&children);
            let mut t = b.start_table::<ArrayT>(1);
            t.add_offset(0, children);
            let inner = t.finish();
            wrap(b, TAG_ARRAY, inner)
        }
        Value::Object(members) => {
            let mut entries = Vec::with_capacity(members.len());
            for (name, member) in members {
                let name = b.create_string(name);
                let member = encode_value(b, member, None);
                let mut t = b.start_table::<MemberT>(2);
                t.add_offset(0, name);
                t.add_offset(1, member);
                entries.push(t.finish());
            }
            let entries = b.create_vector(&entries);
            let mut t = b.start_table::<ObjectT>(1);
            t.add_offset(0, entries);
            let inner = t.finish();
            wrap(b, TAG_OBJECT, inner)
        }
    }
}

fn decode_rule(t: Table<'_>) -> Result<ComparisonRule> {
    let min = t.get_f64(2)?;
    match t.get_u8(0)?.unwrap_or(0) {
        0 => Ok(ComparisonRule::Absolute {
            min,
            max: t.get_f64(1)?,
        }),
        1 => Ok(ComparisonRule::Relative {
            min,
            percent: t.get_bool(3)?,
        }),
        other => Err(WireError::UnknownRuleMode(other)),
    }
}

/// Number of values one buffer may decode into.
///
/// Tables may be referenced from several places, so a small buffer can
/// describe an exponentially large tree. Every encoded value takes more
/// than one byte, which bounds an honest buffer by its length.
struct ValueBudget {
    limit: usize,
    used: usize,
}

impl ValueBudget {
    fn for_buffer(len: usize) -> Self {
        Self { limit: len, used: 0 }
    }

    fn spend(&mut self, count: usize) -> Result<()> {
        self.used = self.used.saturating_add(count);
        if self.used > self.limit {
            return Err(WireError::TooManyValues(self.limit));
        }
        Ok(())
    }
}

fn decode_value(
    wrapper: Table<'_>,
    depth: usize,
    budget: &mut ValueBudget,
) -> Result<(Value, Option<ComparisonRule>)> {
    if depth > MAX_DEPTH {
        return Err(WireError::TooDeep(MAX_DEPTH));
    }
    budget.spend(1)?;
    let tag = wrapper
        .get_u8(0)?
        .ok_or(WireError::missing("TypeWrapper", "value_type"))?;
    let inner = wrapper
        .get_table(1)?
        .ok_or(WireError::missing("TypeWrapper", "value"))?;

    let value = match tag {
        TAG_BOOL => Value::Boolean(inner.get_bool(0)?.unwrap_or(false)),
        TAG_INT => Value::Integer(inner.get_i64(0)?.unwrap_or(0)),
        TAG_DOUBLE => {
            let rule = inner.get_table(1)?.map(decode_rule).transpose()?;
            return Ok((Value::Decimal(inner.get_f64(0)?.unwrap_or(0.0)), rule));
        }
        TAG_STRING => Value::String(inner.get_str(0)?.unwrap_or_default().to_string()),
        TAG_ARRAY => {
            let items = inner.get_tables(0)?.unwrap_or_default();
            budget.spend(items.len())?;
            Value::Array(
                items
                    .into_iter()
                    .map(|item| decode_value(item, depth + 1, budget).map(|(v, _)| v))
                    .collect::<Result<_>>()?,
            )
        }
        TAG_OBJECT => {
            let members = inner.get_tables(0)?.unwrap_or_default();
            budget.spend(members.len())?;
            let mut out = Vec::with_capacity(members.len());
            for member in members {
                let name = member
                    .get_str(0)?
                    .ok_or(WireError::missing("ObjectMember", "name"))?;
                let value = member
                    .get_table(1)?
                    .ok_or(WireError::missing("ObjectMember", "value"))?;
                out.push((name.to_string(), decode_value(value, depth + 1, budget)?.0));
            }
            Value::Object(out)
        }
        other => return Err(WireError::UnknownValueType(other)),
    };
    Ok((value, None))
}

fn encode_metadata(b: &mut Builder, m: &Metadata) -> Offset<MetadataT> {
    let testsuite = b.create_string(&m.testsuite);
    let version = b.create_string(&m.version);
    let testcase = b.create_string(&m.testcase);
    let built_at = b.create_string(&m.built_at);
    let teamslug = b.create_string(&m.teamslug);
    let mut t = b.start_table::<MetadataT>(5);
    t.add_offset(0, testsuite);
    t.add_offset(1, version);
    t.add_offset(2, testcase);
    t.add_offset(3, built_at);
    t.add_offset(4, teamslug);
    t.finish()
}

fn decode_metadata(t: Table<'_>) -> Result<Metadata> {
    let text = |index| -> Result<String> { Ok(t.get_str(index)?.unwrap_or_default().to_string()) };
    Ok(Metadata {
        testsuite: text(0)?,
        version: text(1)?,
        testcase: text(2)?,
        built_at: text(3)?,
        teamslug: text(4)?,
    })
}

impl Message {
    fn encode(&self, b: &mut Builder) -> Offset<MessageT> {
        let metadata = encode_metadata(b, &self.metadata);

        let mut entries = Vec::with_capacity(self.results.len());
        for record in &self.results {
            let key = b.create_string(&record.key);
            let value = encode_value(b, &record.value, record.rule.as_ref());
            let mut t = b.start_table::<ResultT>(3);
            t.add_offset(0, key);
            t.add_offset(1, value);
            if record.category != Category::Check {
                t.add_u8(2, record.category.as_u8());
            }
            entries.push(t.finish());
        }
        let entries = b.create_vector(&entries);
        let mut t = b.start_table::<ResultsT>(1);
        t.add_offset(0, entries);
        let results = t.finish();

        let mut entries = Vec::with_capacity(self.metrics.len());
        for metric in &self.metrics {
            let key = b.create_string(&metric.key);
            let mut t = b.start_table::<MetricT>(2);
            t.add_offset(0, key);
            t.add_i64(1, metric.value);
            entries.push(t.finish());
        }
        let entries = b.create_vector(&entries);
        let mut t = b.start_table::<MetricsT>(1);
        t.add_offset(0, entries);
        let metrics = t.finish();

        let mut t = b.start_table::<MessageT>(4);
        t.add_offset(0, metadata);
        t.add_offset(1, results);
        t.add_offset(2, metrics);
        t.add_u32(3, SCHEMA_VERSION);
        t.finish()
    }

    /// Serialize into a standalone binary buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = Builder::new();
        let root = self.encode(&mut b);
        b.finish(root)
    }

    /// Decode a buffer produced by [`Message::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let root = Table::root(bytes)?;
        Self::decode(root)
    }

    fn decode(root: Table<'_>) -> Result<Self> {
        let metadata = match root.get_table(0)? {
            Some(t) => decode_metadata(t)?,
            None => Metadata::default(),
        };

        let mut budget = ValueBudget::for_buffer(root.buffer_len());
        let mut results = Vec::new();
        if let Some(table) = root.get_table(1)? {
            for entry in table.get_tables(0)?.unwrap_or_default() {
                let key = entry.get_str(0)?.ok_or(WireError::missing("Result", "key"))?;
                let wrapper = entry
                    .get_table(1)?
                    .ok_or(WireError::missing("Result", "value"))?;
                let (value, rule) = decode_value(wrapper, 0, &mut budget)?;
                let category = match entry.get_u8(2)? {
                    Some(tag) => Category::from_u8(tag).ok_or(WireError::UnknownCategory(tag))?,
                    None => Category::Check,
                };
                results.push(ResultRecord {
                    key: key.to_string(),
                    value,
                    category,
                    rule,
                });
            }
        }

        let mut metrics = Vec::new();
        if let Some(table) = root.get_table(2)? {
            for entry in table.get_tables(0)?.unwrap_or_default() {
                let key = entry.get_str(0)?.ok_or(WireError::missing("Metric", "key"))?;
                metrics.push(MetricRecord {
                    key: key.to_string(),
                    value: entry.get_i64(1)?.unwrap_or(0),
                });
            }
        }

        Ok(Self {
            metadata,
            results,
            metrics,
        })
    }
}

/// Wrap already-serialized message buffers into one `Messages` envelope.
pub fn encode_messages<B: AsRef<[u8]>>(buffers: &[B]) -> Vec<u8> {
    let total: usize = buffers.iter().map(|b| b.as_ref().len() + 16).sum();
    let mut b = Builder::with_capacity(total + 16);
    let mut entries = Vec::with_capacity(buffers.len());
    for buffer in buffers {
        let bytes = b.create_bytes(buffer.as_ref());
        let mut t = b.start_table::<MessageBufferT>(1);
        t.add_offset(0, bytes);
        entries.push(t.finish());
    }
    let entries = b.create_vector(&entries);
    let mut t = b.start_table::<MessagesT>(1);
    t.add_offset(0, entries);
    let root = t.finish();
    b.finish(root)
}

/// Borrow the individual message buffers out of a `Messages` envelope.
pub fn split_messages(bytes: &[u8]) -> Result<Vec<&[u8]>> {
    let root = Table::root(bytes)?;
    root.get_tables(0)?
        .unwrap_or_default()
        .into_iter()
        .map(|entry| {
            entry
                .get_bytes(0)?
                .ok_or(WireError::missing("MessageBuffer", "buf"))
        })
        .collect()
}

/// Decode every message in a `Messages` envelope.
pub fn decode_messages(bytes: &[u8]) -> Result<Vec<Message>> {
    split_messages(bytes)?
        .into_iter()
        .map(Message::from_bytes)
        .collect()
}
