//! JSON codec
//!
//! Maps [`Value`] onto `serde_json::Value` and back. Integers stay
//! integers and decimals stay floats, so the mapping is lossless for every
//! finite value. Non-finite decimals have no JSON spelling and encode as
//! `null`, which the decoder rejects.

use serde_json::{json, Map, Number};

use crate::error::WireError;
use crate::schema::{Message, Metadata, MetricRecord, ResultRecord};
use crate::value::{Category, Value};

/// Convert a value into its JSON form.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::Number(Number::from(*i)),
        Value::Decimal(d) => Number::from_f64(*d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Object(members) => serde_json::Value::Object(
            members
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect::<Map<_, _>>(),
        ),
    }
}

/// Convert JSON back into a value.
pub fn from_json(json: &serde_json::Value) -> Result<Value, WireError> {
    Ok(match json {
        serde_json::Value::Null => {
            return Err(WireError::UnsupportedJson("null".to_string()));
        }
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if n.is_u64() {
                return Err(WireError::UnsupportedJson(format!(
                    "integer {n} exceeds the signed 64-bit range"
                )));
            } else {
                Value::Decimal(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Array(items.iter().map(from_json).collect::<Result<_, _>>()?)
        }
        serde_json::Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), from_json(v)?)))
                .collect::<Result<_, WireError>>()?,
        ),
    })
}

fn keyed(key: &str, value: serde_json::Value) -> serde_json::Value {
    json!({ "key": key, "value": value })
}

impl Message {
    /// JSON artifact form:
    /// `{ metadata, results: [{key, value}], assertions: [{key, value}], metrics: [{key, value}] }`
    pub fn to_json(&self) -> serde_json::Value {
        let mut results = Vec::new();
        let mut assertions = Vec::new();
        for record in &self.results {
            let entry = keyed(&record.key, to_json(&record.value));
            match record.category {
                Category::Check => results.push(entry),
                Category::Assert => assertions.push(entry),
            }
        }
        let metrics: Vec<_> = self
            .metrics
            .iter()
            .map(|m| keyed(&m.key, json!(m.value)))
            .collect();

        json!({
            "metadata": self.metadata,
            "results": results,
            "assertions": assertions,
            "metrics": metrics,
        })
    }

    /// Parse the JSON artifact form. Comparison rules are not part of it.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, WireError> {
        let metadata: Metadata = serde_json::from_value(json["metadata"].clone())
            .map_err(|e| WireError::UnsupportedJson(format!("metadata: {e}")))?;

        let entries = |section: &str| -> Result<Vec<(String, &serde_json::Value)>, WireError> {
            let Some(items) = json.get(section) else {
                return Ok(Vec::new());
            };
            let items = items
                .as_array()
                .ok_or_else(|| WireError::UnsupportedJson(format!("`{section}` is not an array")))?;
            items
                .iter()
                .map(|item| {
                    let key = item["key"].as_str().ok_or_else(|| {
                        WireError::UnsupportedJson(format!("`{section}` entry without a key"))
                    })?;
                    Ok((key.to_string(), &item["value"]))
                })
                .collect()
        };

        let mut results = Vec::new();
        for (section, category) in [("results", Category::Check), ("assertions", Category::Assert)] {
            for (key, value) in entries(section)? {
                results.push(ResultRecord {
                    key,
                    value: from_json(value)?,
                    category,
                    rule: None,
                });
            }
        }

        let metrics = entries("metrics")?
            .into_iter()
            .map(|(key, value)| {
                let value = value.as_i64().ok_or_else(|| {
                    WireError::UnsupportedJson(format!("metric `{key}` is not an integer"))
                })?;
                Ok(MetricRecord { key, value })
            })
            .collect::<Result<_, WireError>>()?;

        Ok(Self {
            metadata,
            results,
            metrics,
        })
    }
}
