//! Octet Encoding Rules primitives used by the ILP, CCP, and ILDCP codecs.

use bytes::BufMut;

use crate::error::CoreError;

/// Cursor over an OER-encoded buffer.
pub struct OerReader<'a> {
    buf: &'a [u8],
}

impl<'a> OerReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn ensure(&self, needed: usize) -> Result<(), CoreError> {
        if self.buf.len() < needed {
            return Err(CoreError::UnexpectedEof {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CoreError> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CoreError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), CoreError> {
        self.read_bytes(len).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, CoreError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CoreError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CoreError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CoreError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Read a length determinant: short form (< 128) or long form
    /// (`0x80 | n` followed by `n` big-endian length bytes).
    pub fn read_length_prefix(&mut self) -> Result<usize, CoreError> {
        let first = self.read_u8()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let len_of_len = (first & 0x7f) as usize;
        if len_of_len == 0 || len_of_len > 8 {
            return Err(CoreError::InvalidLength(format!(
                "length-of-length out of range: {}",
                len_of_len
            )));
        }
        let mut len: u64 = 0;
        for byte in self.read_bytes(len_of_len)? {
            len = (len << 8) | *byte as u64;
        }
        usize::try_from(len).map_err(|_| CoreError::InvalidLength(format!("length too large: {}", len)))
    }

    pub fn read_var_octet_string(&mut self) -> Result<&'a [u8], CoreError> {
        let len = self.read_length_prefix()?;
        self.read_bytes(len)
    }

    /// Read a UTF-8 variable-length string. `field` names the field in errors.
    pub fn read_var_str(&mut self, field: &'static str) -> Result<String, CoreError> {
        let raw = self.read_var_octet_string()?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| CoreError::InvalidUtf8(field))
    }

    /// Read a variable-length unsigned integer (at most 8 bytes).
    pub fn read_var_uint(&mut self) -> Result<u64, CoreError> {
        let raw = self.read_var_octet_string()?;
        if raw.is_empty() || raw.len() > 8 {
            return Err(CoreError::InvalidLength(format!(
                "var uint must be 1..=8 bytes, got {}",
                raw.len()
            )));
        }
        Ok(raw.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }
}

/// OER writers for any `BufMut`.
pub trait OerWriteExt: BufMut {
    fn put_length_prefix(&mut self, len: usize) {
        if len < 0x80 {
            self.put_u8(len as u8);
            return;
        }
        let bytes = (len as u64).to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        self.put_u8(0x80 | (8 - skip) as u8);
        self.put_slice(&bytes[skip..]);
    }

    fn put_var_octet_string(&mut self, data: &[u8]) {
        self.put_length_prefix(data.len());
        self.put_slice(data);
    }

    fn put_var_uint(&mut self, value: u64) {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
        self.put_var_octet_string(&bytes[skip..]);
    }
}

impl<B: BufMut> OerWriteExt for B {}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_short_and_long_length_prefix() {
        let mut buf = BytesMut::new();
        buf.put_length_prefix(5);
        buf.put_length_prefix(300);
        assert_eq!(&buf[..], &[0x05, 0x82, 0x01, 0x2c]);

        let mut reader = OerReader::new(&buf);
        assert_eq!(reader.read_length_prefix().unwrap(), 5);
        assert_eq!(reader.read_length_prefix().unwrap(), 300);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_var_uint_is_minimal() {
        let mut buf = BytesMut::new();
        buf.put_var_uint(0);
        buf.put_var_uint(256);
        assert_eq!(&buf[..], &[0x01, 0x00, 0x02, 0x01, 0x00]);

        let mut reader = OerReader::new(&buf);
        assert_eq!(reader.read_var_uint().unwrap(), 0);
        assert_eq!(reader.read_var_uint().unwrap(), 256);
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut reader = OerReader::new(&[0x03, 0x61]);
        let err = reader.read_var_octet_string().unwrap_err();
        assert!(matches!(err, CoreError::UnexpectedEof { needed: 3, remaining: 1 }));
    }

    #[test]
    fn test_invalid_utf8_is_reported_with_field() {
        let mut reader = OerReader::new(&[0x01, 0xff]);
        let err = reader.read_var_str("message").unwrap_err();
        assert!(matches!(err, CoreError::InvalidUtf8("message")));
    }
}
