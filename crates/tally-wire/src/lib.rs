//! Tally Wire Types
//!
//! Defines the captured value model and the two encodings it travels in:
//! an offset-based binary table format (submissions and `.bin` artifacts)
//! and a self-describing JSON form (`.json` artifacts).

pub mod builder;
pub mod error;
pub mod json;
pub mod reader;
pub mod response;
pub mod rule;
pub mod schema;
pub mod value;

pub use builder::{Builder, Offset, TableBuilder};
pub use error::WireError;
pub use reader::Table;
pub use response::{ComparisonOverview, ErrorBody, VersionRef};
pub use rule::ComparisonRule;
pub use schema::{Message, Metadata, MetricRecord, ResultRecord};
pub use value::{Category, Value};

/// Schema version written into every `Message`.
///
/// Readers treat an absent version as 1.
pub const SCHEMA_VERSION: u32 = 1;

/// Deepest `Array`/`Object` nesting the binary decoder will follow.
pub const MAX_DEPTH: usize = 128;
