//! Offset-based binary builder
//!
//! Buffers are assembled bottom-up: strings, vectors and child tables are
//! appended first and referenced from their parent by absolute offset.
//! Layout:
//!
//! ```text
//! [u32 root offset][object][object]...
//!
//! table:  [u16 field_count][u16 slot; field_count][inline field data]
//!         slot = position of the field relative to the start of the
//!                inline data, or 0xFFFF when the field is absent
//! string: [u32 byte length][UTF-8 bytes]
//! vector: [u32 count][elements]   (tables are stored as u32 offsets)
//! ```
//!
//! All integers and floats are little-endian.

use std::fmt;
use std::marker::PhantomData;

/// Slot value marking an absent table field.
pub(crate) const ABSENT: u16 = u16::MAX;

/// Position of a finished object inside a [`Builder`]'s buffer.
///
/// The type parameter records what the offset points at, so a parent
/// table can only reference children of the kind its schema expects.
pub struct Offset<T> {
    pos: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Offset<T> {
    fn new(pos: u32) -> Self {
        Self {
            pos,
            _marker: PhantomData,
        }
    }

    /// Absolute byte position in the buffer.
    pub fn position(&self) -> u32 {
        self.pos
    }
}

impl<T> Clone for Offset<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Offset<T> {}

impl<T> fmt::Debug for Offset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Offset({})", self.pos)
    }
}

/// Marker for a length-prefixed UTF-8 string.
pub enum WireStr {}

/// Marker for a length-prefixed byte vector.
pub enum Bytes {}

/// Marker for a vector of offsets to `T`.
pub struct Vector<T>(PhantomData<T>);

/// Growable buffer that serializes objects bottom-up.
pub struct Builder {
    buf: Vec<u8>,
}

impl Builder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create an empty builder with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity.max(4));
        // Root offset, patched by `finish`.
        buf.extend_from_slice(&[0u8; 4]);
        Self { buf }
    }

    /// Bytes written so far, including the root offset placeholder.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() <= 4
    }

    /// # Panics
    ///
    /// Panics once the buffer grows past the 4 GiB addressable by `u32`
    /// offsets.
    fn position(&self) -> u32 {
        match u32::try_from(self.buf.len()) {
            Ok(pos) => pos,
            Err(_) => panic!("binary buffer exceeds the 4 GiB offset range"),
        }
    }

    fn push_len(&mut self, len: usize) {
        let len = match u32::try_from(len) {
            Ok(len) => len,
            Err(_) => panic!("binary vector length {len} exceeds u32 range"),
        };
        self.buf.extend_from_slice(&len.to_le_bytes());
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn create_string(&mut self, s: &str) -> Offset<WireStr> {
        let pos = self.position();
        self.push_len(s.len());
        self.buf.extend_from_slice(s.as_bytes());
        Offset::new(pos)
    }

    /// Append a length-prefixed byte vector.
    pub fn create_bytes(&mut self, bytes: &[u8]) -> Offset<Bytes> {
        let pos = self.position();
        self.push_len(bytes.len());
        self.buf.extend_from_slice(bytes);
        Offset::new(pos)
    }

    /// Append a vector of offsets to already-finished objects.
    pub fn create_vector<T>(&mut self, items: &[Offset<T>]) -> Offset<Vector<T>> {
        let pos = self.position();
        self.push_len(items.len());
        for item in items {
            self.buf.extend_from_slice(&item.pos.to_le_bytes());
        }
        Offset::new(pos)
    }

    /// Begin a table with room for `field_count` fields.
    ///
    /// The returned [`TableBuilder`] borrows the builder mutably until
    /// [`TableBuilder::finish`], so every child the table references must
    /// be created before the table is started.
    pub fn start_table<T>(&mut self, field_count: u16) -> TableBuilder<'_, T> {
        TableBuilder {
            builder: self,
            slots: vec![ABSENT; usize::from(field_count)],
            inline: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Record `root` as the root table and return the finished bytes.
    pub fn finish<T>(mut self, root: Offset<T>) -> Vec<u8> {
        self.buf[..4].copy_from_slice(&root.pos.to_le_bytes());
        self.buf
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// A table under construction.
pub struct TableBuilder<'b, T> {
    builder: &'b mut Builder,
    slots: Vec<u16>,
    inline: Vec<u8>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TableBuilder<'_, T> {
    fn put(&mut self, index: u16, bytes: &[u8]) {
        let index = usize::from(index);
        assert!(
            index < self.slots.len(),
            "field index {index} out of range for table with {} fields",
            self.slots.len()
        );
        let slot = match u16::try_from(self.inline.len()) {
            Ok(slot) if slot != ABSENT => slot,
            _ => panic!("table inline data exceeds 64 KiB"),
        };
        self.slots[index] = slot;
        self.inline.extend_from_slice(bytes);
    }

    pub fn add_u8(&mut self, index: u16, value: u8) {
        self.put(index, &[value]);
    }

    pub fn add_bool(&mut self, index: u16, value: bool) {
        self.put(index, &[u8::from(value)]);
    }

    pub fn add_u32(&mut self, index: u16, value: u32) {
        self.put(index, &value.to_le_bytes());
    }

    pub fn add_i64(&mut self, index: u16, value: i64) {
        self.put(index, &value.to_le_bytes());
    }

    pub fn add_f64(&mut self, index: u16, value: f64) {
        self.put(index, &value.to_le_bytes());
    }

    /// Reference a finished string, vector, or table.
    pub fn add_offset<U>(&mut self, index: u16, offset: Offset<U>) {
        self.put(index, &offset.pos.to_le_bytes());
    }

    /// Write the table and return its offset.
    pub fn finish(self) -> Offset<T> {
        let pos = self.builder.position();
        let buf = &mut self.builder.buf;
        // slots.len() came from a u16
        buf.extend_from_slice(&(self.slots.len() as u16).to_le_bytes());
        for slot in &self.slots {
            buf.extend_from_slice(&slot.to_le_bytes());
        }
        buf.extend_from_slice(&self.inline);
        Offset::new(pos)
    }
}
