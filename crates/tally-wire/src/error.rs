//! Error types for the wire codecs.

/// Errors raised while decoding binary or JSON payloads.
///
/// Encoding never fails; every `Value` has a representation.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// An offset or length points past the end of the buffer.
    #[error("buffer truncated: need {needed} bytes at offset {offset}, buffer has {len}")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },

    /// A string field does not hold valid UTF-8.
    #[error("invalid UTF-8 in string at offset {0}")]
    InvalidUtf8(usize),

    /// A type wrapper carries a tag outside the known union members.
    #[error("unknown value type tag {0}")]
    UnknownValueType(u8),

    /// A result carries a category byte outside {1, 2}.
    #[error("unknown result category {0}")]
    UnknownCategory(u8),

    /// A comparison rule carries an unknown mode byte.
    #[error("unknown comparison rule mode {0}")]
    UnknownRuleMode(u8),

    /// A field the reader cannot do without is absent.
    #[error("missing required field `{field}` in {table}")]
    MissingField {
        table: &'static str,
        field: &'static str,
    },

    /// Nested arrays/objects go deeper than the decoder follows.
    #[error("value nesting exceeds {0} levels")]
    TooDeep(usize),

    /// Shared children expand into more values than the buffer could hold.
    #[error("buffer expands into more than {0} values")]
    TooManyValues(usize),

    /// JSON input has no counterpart in the value model.
    #[error("unsupported JSON value: {0}")]
    UnsupportedJson(String),
}

impl WireError {
    pub(crate) fn missing(table: &'static str, field: &'static str) -> Self {
        Self::MissingField { table, field }
    }
}
