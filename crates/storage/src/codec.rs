//! Fixed-layout big-endian record codecs

use alloy_primitives::U256;
use commander_smt::Hash;

use crate::error::StorageError;

/// Reads a record field by field, failing on truncated input.
#[derive(Debug)]
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    entity: &'static str,
}

impl<'a> Reader<'a> {
    pub(crate) const fn new(data: &'a [u8], entity: &'static str) -> Self {
        Self { data, entity }
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], StorageError> {
        if self.data.len() < len {
            return Err(StorageError::InvalidLength(self.entity));
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N], StorageError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, StorageError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32, StorageError> {
        self.array().map(u32::from_be_bytes)
    }

    pub(crate) fn u64(&mut self) -> Result<u64, StorageError> {
        self.array().map(u64::from_be_bytes)
    }

    pub(crate) fn u256(&mut self) -> Result<U256, StorageError> {
        self.array::<32>().map(U256::from_be_bytes)
    }

    pub(crate) fn hash(&mut self) -> Result<Hash, StorageError> {
        self.array()
    }

    /// Presence flag followed by the value's fixed-width bytes
    pub(crate) fn option<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> Result<T, StorageError>,
    ) -> Result<Option<T>, StorageError> {
        let present = self.u8()? != 0;
        let value = read(self)?;
        Ok(present.then_some(value))
    }

    pub(crate) const fn remaining(&self) -> &'a [u8] {
        self.data
    }

    /// Fail unless the whole record was consumed
    pub(crate) fn finish(self) -> Result<(), StorageError> {
        if !self.data.is_empty() {
            return Err(StorageError::InvalidLength(self.entity));
        }
        Ok(())
    }
}

/// Appends record fields to a buffer.
pub(crate) trait Writer {
    fn put_u32(&mut self, value: u32);
    fn put_u64(&mut self, value: u64);
    fn put_u256(&mut self, value: &U256);
    /// Presence flag followed by `width` bytes, zeroed when absent
    fn put_option<T>(&mut self, value: Option<&T>, width: usize, write: impl FnOnce(&mut Self, &T));
}

impl Writer for Vec<u8> {
    fn put_u32(&mut self, value: u32) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn put_u256(&mut self, value: &U256) {
        self.extend_from_slice(&value.to_be_bytes::<32>());
    }

    fn put_option<T>(&mut self, value: Option<&T>, width: usize, write: impl FnOnce(&mut Self, &T)) {
        match value {
            Some(value) => {
                self.push(1);
                write(self, value);
            }
            None => {
                self.push(0);
                self.resize(self.len() + width, 0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_input() {
        let mut reader = Reader::new(&[0, 0, 1], "record");
        assert_eq!(reader.u32(), Err(StorageError::InvalidLength("record")));
    }

    #[test]
    fn test_absent_option_keeps_fixed_width() {
        let mut buf = Vec::new();
        buf.put_option(None::<&u32>, 4, |buf, value| buf.put_u32(*value));
        buf.put_option(Some(&7u32), 4, |buf, value| buf.put_u32(*value));
        assert_eq!(buf, vec![0, 0, 0, 0, 0, 1, 0, 0, 0, 7]);

        let mut reader = Reader::new(&buf, "record");
        assert_eq!(reader.option(Reader::u32).unwrap(), None);
        assert_eq!(reader.option(Reader::u32).unwrap(), Some(7));
        reader.finish().unwrap();
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let mut reader = Reader::new(&[0, 0, 0, 1, 9], "record");
        assert_eq!(reader.u32().unwrap(), 1);
        assert!(reader.finish().is_err());
    }
}
