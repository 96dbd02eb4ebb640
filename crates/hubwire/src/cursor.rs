//! # Cursor
//!
//! Bounds-checked reading and little-endian writing of the frame primitives.
//!
//! ## Invariants
//! - **Panic Safety**: every read checks the remaining length first and returns
//!   `Error::UnexpectedEnd` instead of slicing past the end.
//! - **Zero-Copy**: blobs are returned as `Bytes` views into the input buffer.

use bytes::Buf;
use bytes::Bytes;

use crate::error::Error;
use crate::error::Result;

/// Zero-copy reader over a received frame.
pub struct Reader {
    buf: Bytes,
}

impl Reader {
    /// Creates a reader over the buffer.
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn need(&self, n: usize) -> Result<()> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        Ok(())
    }

    /// Decodes u8.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    /// Decodes u16 (LE).
    pub fn read_u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    /// Decodes u32 (LE).
    pub fn read_u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    /// Splits off the next `n` bytes without copying.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        self.need(n)?;
        Ok(self.buf.split_to(n))
    }

    /// Decodes a `[Len: 4b][Data]` blob.
    pub fn read_blob(&mut self) -> Result<Bytes> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    /// Decodes a `[Len: 1b][UTF-8]` name.
    pub fn read_name(&mut self) -> Result<String> {
        let len = self.read_u8()? as usize;
        let raw = self.read_bytes(len)?;
        utf8(&raw)
    }

    /// Decodes a `[Len: 4b][UTF-8]` message.
    pub fn read_text(&mut self) -> Result<String> {
        let raw = self.read_blob()?;
        utf8(&raw)
    }
}

fn utf8(raw: &[u8]) -> Result<String> {
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|_| Error::InvalidUtf8)
}

/// Encodes u16 (LE).
pub fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Encodes u32 (LE).
pub fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Encodes a `[Len: 4b][Data]` blob.
pub fn write_blob(out: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len()).map_err(|_| Error::PayloadTooLarge(data.len()))?;
    write_u32(out, len);
    out.extend_from_slice(data);
    Ok(())
}

/// Encodes a `[Len: 1b][UTF-8]` name.
pub fn write_name(out: &mut Vec<u8>, name: &str) -> Result<()> {
    let len = u8::try_from(name.len()).map_err(|_| Error::NameTooLong(name.len()))?;
    out.push(len);
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian() {
        let mut r = Reader::new(Bytes::from_static(&[0x34, 0x12, 0x78, 0x56, 0x34, 0x12]));
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0x1234_5678);
        assert!(r.is_empty());
    }

    #[test]
    fn short_reads_fail_without_consuming() {
        let mut r = Reader::new(Bytes::from_static(&[0x01, 0x02, 0x03]));
        assert_eq!(r.read_u32(), Err(Error::UnexpectedEnd));
        assert_eq!(r.remaining(), 3);
    }

    #[test]
    fn blob_length_past_end_is_rejected() {
        let mut out = Vec::new();
        write_u32(&mut out, 10);
        out.extend_from_slice(b"abc");
        let mut r = Reader::new(Bytes::from(out));
        assert_eq!(r.read_blob(), Err(Error::UnexpectedEnd));
    }

    #[test]
    fn name_limit_is_255_bytes() {
        let mut out = Vec::new();
        assert!(write_name(&mut out, &"a".repeat(255)).is_ok());
        assert_eq!(out.len(), 256);
        assert_eq!(write_name(&mut out, &"a".repeat(256)), Err(Error::NameTooLong(256)));
    }

    #[test]
    fn invalid_utf8_name() {
        let mut r = Reader::new(Bytes::from_static(&[0x02, 0xC3, 0x28]));
        assert_eq!(r.read_name(), Err(Error::InvalidUtf8));
    }
}
