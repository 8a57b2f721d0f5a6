//! Bounds-checked reader for the binary table format
//!
//! Every access validates offsets and lengths against the buffer; corrupt
//! or truncated input yields [`WireError`], never a panic. Field indices
//! beyond a table's `field_count` read as absent, which is what lets older
//! readers skip fields appended by newer writers.

use crate::builder::ABSENT;
use crate::error::WireError;

type Result<T> = std::result::Result<T, WireError>;

fn slice(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let end = offset.checked_add(len).ok_or(WireError::Truncated {
        offset,
        needed: len,
        len: buf.len(),
    })?;
    buf.get(offset..end).ok_or(WireError::Truncated {
        offset,
        needed: len,
        len: buf.len(),
    })
}

fn read_u16(buf: &[u8], offset: usize) -> Result<u16> {
    let bytes = slice(buf, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    let bytes = slice(buf, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// A table view into a binary buffer.
#[derive(Debug, Clone, Copy)]
pub struct Table<'a> {
    buf: &'a [u8],
    pos: usize,
    field_count: usize,
}

impl<'a> Table<'a> {
    /// Open the root table of a finished buffer.
    pub fn root(buf: &'a [u8]) -> Result<Self> {
        let pos = read_u32(buf, 0)? as usize;
        Self::at(buf, pos)
    }

    /// Open the table starting at absolute position `pos`.
    pub fn at(buf: &'a [u8], pos: usize) -> Result<Self> {
        let field_count = usize::from(read_u16(buf, pos)?);
        // slot array must be fully present
        slice(buf, pos + 2, field_count * 2)?;
        Ok(Self {
            buf,
            pos,
            field_count,
        })
    }

    /// Length of the whole buffer this table lives in.
    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    /// Number of fields the writer declared.
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    fn field(&self, index: usize, size: usize) -> Result<Option<&'a [u8]>> {
        if index >= self.field_count {
            return Ok(None);
        }
        let slot = read_u16(self.buf, self.pos + 2 + index * 2)?;
        if slot == ABSENT {
            return Ok(None);
        }
        let data_start = self.pos + 2 + self.field_count * 2;
        slice(self.buf, data_start + usize::from(slot), size).map(Some)
    }

    pub fn get_u8(&self, index: usize) -> Result<Option<u8>> {
        Ok(self.field(index, 1)?.map(|b| b[0]))
    }

    pub fn get_bool(&self, index: usize) -> Result<Option<bool>> {
        Ok(self.get_u8(index)?.map(|b| b != 0))
    }

    pub fn get_u32(&self, index: usize) -> Result<Option<u32>> {
        Ok(self.field(index, 4)?.map(|b| u32::from_le_bytes(read_array(b))))
    }

    pub fn get_i64(&self, index: usize) -> Result<Option<i64>> {
        Ok(self.field(index, 8)?.map(|b| i64::from_le_bytes(read_array(b))))
    }

    pub fn get_f64(&self, index: usize) -> Result<Option<f64>> {
        Ok(self.field(index, 8)?.map(|b| f64::from_le_bytes(read_array(b))))
    }

    fn get_offset(&self, index: usize) -> Result<Option<usize>> {
        Ok(self.get_u32(index)?.map(|o| o as usize))
    }

    /// Follow an offset field to a child table.
    pub fn get_table(&self, index: usize) -> Result<Option<Table<'a>>> {
        match self.get_offset(index)? {
            Some(pos) => Table::at(self.buf, pos).map(Some),
            None => Ok(None),
        }
    }

    /// Follow an offset field to a string.
    pub fn get_str(&self, index: usize) -> Result<Option<&'a str>> {
        match self.get_offset(index)? {
            Some(pos) => {
                let len = read_u32(self.buf, pos)? as usize;
                let bytes = slice(self.buf, pos + 4, len)?;
                std::str::from_utf8(bytes)
                    .map(Some)
                    .map_err(|_| WireError::InvalidUtf8(pos))
            }
            None => Ok(None),
        }
    }

    /// Follow an offset field to a byte vector.
    pub fn get_bytes(&self, index: usize) -> Result<Option<&'a [u8]>> {
        match self.get_offset(index)? {
            Some(pos) => {
                let len = read_u32(self.buf, pos)? as usize;
                slice(self.buf, pos + 4, len).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Follow an offset field to a vector of tables.
    pub fn get_tables(&self, index: usize) -> Result<Option<Vec<Table<'a>>>> {
        let Some(pos) = self.get_offset(index)? else {
            return Ok(None);
        };
        let count = read_u32(self.buf, pos)? as usize;
        let entries = slice(self.buf, pos + 4, count.saturating_mul(4))?;
        entries
            .chunks_exact(4)
            .map(|chunk| Table::at(self.buf, u32::from_le_bytes(read_array(chunk)) as usize))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    enum Sample {}
    enum Child {}

    fn sample() -> Vec<u8> {
        let mut b = Builder::new();
        let name = b.create_string("résumé");
        let raw = b.create_bytes(&[1, 2, 3]);

        let mut children = Vec::new();
        for i in 0..3 {
            let mut t = b.start_table::<Child>(1);
            t.add_i64(0, i * 10);
            children.push(t.finish());
        }
        let children = b.create_vector(&children);

        let mut t = b.start_table::<Sample>(6);
        t.add_offset(0, name);
        t.add_bool(1, true);
        t.add_f64(2, 1.5);
        t.add_offset(3, raw);
        t.add_offset(4, children);
        let root = t.finish();
        b.finish(root)
    }

    #[test]
    fn test_read_fields() {
        let bytes = sample();
        let root = Table::root(&bytes).unwrap();

        assert_eq!(root.field_count(), 6);
        assert_eq!(root.get_str(0).unwrap(), Some("résumé"));
        assert_eq!(root.get_bool(1).unwrap(), Some(true));
        assert_eq!(root.get_f64(2).unwrap(), Some(1.5));
        assert_eq!(root.get_bytes(3).unwrap(), Some(&[1u8, 2, 3][..]));

        let children = root.get_tables(4).unwrap().unwrap();
        let values: Vec<i64> = children
            .iter()
            .map(|c| c.get_i64(0).unwrap().unwrap())
            .collect();
        assert_eq!(values, vec![0, 10, 20]);
    }

    #[test]
    fn test_absent_and_unknown_fields() {
        let bytes = sample();
        let root = Table::root(&bytes).unwrap();

        // declared but never written
        assert_eq!(root.get_u8(5).unwrap(), None);
        // beyond what the writer declared: a newer reader asking for a field
        // an older writer never knew about
        assert_eq!(root.get_i64(42).unwrap(), None);
    }

    #[test]
    fn test_truncated_buffer_errors() {
        let bytes = sample();
        for cut in [0, 3, 10, bytes.len() - 1] {
            let truncated = &bytes[..cut];
            let result = Table::root(truncated).and_then(|t| {
                t.get_str(0)?;
                t.get_tables(4)?;
                t.get_f64(2)?;
                Ok(())
            });
            assert!(result.is_err(), "cut at {cut} should fail");
        }
    }

    #[test]
    fn test_invalid_utf8() {
        let mut b = Builder::new();
        let raw = b.create_bytes(&[0xff, 0xfe]);
        let mut t = b.start_table::<Sample>(1);
        t.add_offset(0, raw);
        let root = t.finish();
        let bytes = b.finish(root);

        let table = Table::root(&bytes).unwrap();
        assert!(matches!(table.get_str(0), Err(WireError::InvalidUtf8(_))));
    }

    #[test]
    fn test_wild_root_offset() {
        let bytes = [0xff, 0xff, 0xff, 0x7f, 0, 0];
        assert!(matches!(
            Table::root(&bytes),
            Err(WireError::Truncated { .. })
        ));
    }
}
