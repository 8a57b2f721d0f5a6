//! Built-in client defaults (layer 1)

use serde::{Deserialize, Serialize};

/// Built-in default option values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Capture locally without contacting the server (default: false)
    pub offline: bool,

    /// Share one active test case across threads (default: true)
    pub concurrency: bool,

    /// Decompose structs and enums without an adapter (default: true)
    pub reflection: bool,

    /// Ask the server to process submissions asynchronously (default: false)
    pub submit_async: bool,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            offline: false,
            concurrency: true,
            reflection: true,
            submit_async: false,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "offline": self.offline,
            "concurrency": self.concurrency,
            "reflection": self.reflection,
            "submit_async": self.submit_async,
        })
    }
}
