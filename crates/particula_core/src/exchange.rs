//! # Particle Records
//!
//! A buffer of packed per-particle records as produced for migration,
//! ghost exchange and checkpoints. The communication and checkpoint layers
//! move these bytes; only the store interprets them.
//!
//! ## Wire layout
//!
//! ```text
//! [u32 record count] ([u32 record length] [record bytes])*
//! ```
//!
//! All integers are little-endian.

use crate::error::{StorageError, StorageResult};

/// Packed particle records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExchangeBuffer {
    bytes: Vec<u8>,
    records: Vec<(usize, usize)>,
}

impl ExchangeBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Checks if the buffer holds no records.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drops every record, keeping the allocation.
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.records.clear();
    }

    /// Appends one record written by `write`.
    ///
    /// Returns what `write` returns.
    pub fn push_record<R>(&mut self, write: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        let start = self.bytes.len();
        let result = write(&mut self.bytes);
        self.records.push((start, self.bytes.len()));
        result
    }

    /// Bytes of record `index`.
    #[must_use]
    pub fn record(&self, index: usize) -> Option<&[u8]> {
        let &(start, end) = self.records.get(index)?;
        self.bytes.get(start..end)
    }

    /// Iterates the records in order.
    pub fn records(&self) -> impl Iterator<Item = &[u8]> {
        self.records
            .iter()
            .map(|&(start, end)| &self.bytes[start..end])
    }

    /// Encodes the buffer for transport.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MalformedRecord`] if a record or the record
    /// count does not fit in a `u32`.
    pub fn to_wire(&self) -> StorageResult<Vec<u8>> {
        let mut wire = Vec::with_capacity(4 + 4 * self.records.len() + self.bytes.len());
        wire.extend_from_slice(&wire_len(self.records.len())?.to_le_bytes());
        for record in self.records() {
            wire.extend_from_slice(&wire_len(record.len())?.to_le_bytes());
            wire.extend_from_slice(record);
        }
        Ok(wire)
    }

    /// Decodes a buffer produced by [`Self::to_wire`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MalformedRecord`] on truncated input or
    /// trailing bytes.
    pub fn from_wire(wire: &[u8]) -> StorageResult<Self> {
        let mut cursor = 0;
        let count = read_len(wire, &mut cursor)?;
        let mut buffer = Self::new();
        for _ in 0..count {
            let len = read_len(wire, &mut cursor)?;
            let record = wire
                .get(cursor..cursor + len)
                .ok_or_else(|| StorageError::MalformedRecord("record body truncated".to_string()))?;
            buffer.push_record(|out| out.extend_from_slice(record));
            cursor += len;
        }
        if cursor != wire.len() {
            return Err(StorageError::MalformedRecord(format!(
                "{} trailing bytes",
                wire.len() - cursor
            )));
        }
        Ok(buffer)
    }
}

fn wire_len(len: usize) -> StorageResult<u32> {
    u32::try_from(len)
        .map_err(|_| StorageError::MalformedRecord(format!("length {len} exceeds u32")))
}

fn read_len(wire: &[u8], cursor: &mut usize) -> StorageResult<usize> {
    let head: [u8; 4] = wire
        .get(*cursor..*cursor + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| StorageError::MalformedRecord("length prefix truncated".to_string()))?;
    *cursor += 4;
    Ok(u32::from_le_bytes(head) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records() {
        let mut buffer = ExchangeBuffer::new();
        let written = buffer.push_record(|out| {
            out.extend_from_slice(&[1, 2, 3]);
            3
        });
        assert_eq!(written, 3);
        buffer.push_record(|_| ());
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.record(0), Some(&[1u8, 2, 3][..]));
        assert_eq!(buffer.record(1), Some(&[][..]));
        assert_eq!(buffer.record(2), None);
    }

    #[test]
    fn test_wire_format() {
        let mut buffer = ExchangeBuffer::new();
        buffer.push_record(|out| out.push(9));
        let wire = buffer.to_wire().unwrap();
        assert_eq!(wire, vec![1, 0, 0, 0, 1, 0, 0, 0, 9]);
        assert_eq!(ExchangeBuffer::from_wire(&wire).unwrap(), buffer);

        assert!(ExchangeBuffer::from_wire(&wire[..7]).is_err());
        let mut padded = wire.clone();
        padded.push(0);
        assert!(ExchangeBuffer::from_wire(&padded).is_err());
    }
}
