//! LEB128 variable-length integers and a bounds-checked record reader

use crate::error::{Result, StoreError};

/// Upper bound on capacity reserved from a count read out of a record
pub const PREALLOC_LIMIT: usize = 1024;

/// Encode an unsigned 64-bit integer as LEB128 into `buf`.
pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a LEB128 unsigned 64-bit integer from `buf` starting at `*pos`.
/// Advances `*pos` past the consumed bytes.
pub fn decode_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let Some(&byte) = buf.get(*pos) else {
            return Err(StoreError::InvalidFormat("unexpected end of varint".into()));
        };
        *pos += 1;

        // the tenth byte may only carry the top bit, with no continuation
        if shift >= 63 && byte > 1 {
            return Err(StoreError::InvalidFormat("varint overflow".into()));
        }
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Number of bytes `value` occupies once encoded
pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Write a length-prefixed UTF-8 string
pub fn encode_str(value: &str, buf: &mut Vec<u8>) {
    encode_varint(value.len() as u64, buf);
    buf.extend_from_slice(value.as_bytes());
}

/// Cursor over a record body
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn varint(&mut self) -> Result<u64> {
        decode_varint(self.buf, &mut self.pos)
    }

    pub fn byte(&mut self) -> Result<u8> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| StoreError::InvalidFormat("unexpected end of record".into()))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                StoreError::InvalidFormat(format!(
                    "need {} bytes at {}, record has {}",
                    len,
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn string(&mut self) -> Result<String> {
        let len = self.varint()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| StoreError::InvalidFormat(format!("invalid UTF-8 in record: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_varint(val: u64) {
        let mut buf = Vec::new();
        encode_varint(val, &mut buf);
        assert_eq!(buf.len(), varint_len(val));
        let mut pos = 0;
        let decoded = decode_varint(&buf, &mut pos).unwrap();
        assert_eq!(decoded, val);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn test_varint_boundaries() {
        for val in [0, 1, 127, 128, 255, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            round_trip_varint(val);
        }
    }

    #[test]
    fn test_varint_single_byte_below_128() {
        let mut buf = Vec::new();
        encode_varint(127, &mut buf);
        assert_eq!(buf, vec![0x7F]);

        buf.clear();
        encode_varint(128, &mut buf);
        assert_eq!(buf, vec![0x80, 0x01]);
    }

    #[test]
    fn test_varint_unexpected_eof() {
        let mut pos = 0;
        assert!(decode_varint(&[], &mut pos).is_err());

        let mut pos = 0;
        assert!(decode_varint(&[0x80, 0x80], &mut pos).is_err());
    }

    #[test]
    fn test_varint_overflow_rejected() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x02];
        let mut pos = 0;
        assert!(decode_varint(&buf, &mut pos).is_err());

        // eleven bytes: continuation past the tenth
        let mut buf = vec![0x80; 10];
        buf.push(0x00);
        let mut pos = 0;
        assert!(matches!(
            decode_varint(&buf, &mut pos),
            Err(StoreError::InvalidFormat(_))
        ));

        let mut buf = vec![0xFF; 9];
        buf.push(0x81);
        let mut pos = 0;
        assert!(decode_varint(&buf, &mut pos).is_err());
    }

    #[test]
    fn test_reader_mixed_fields() {
        let mut buf = Vec::new();
        encode_varint(300, &mut buf);
        encode_str("http://example.org/a", &mut buf);
        buf.push(7);

        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.varint().unwrap(), 300);
        assert_eq!(reader.string().unwrap(), "http://example.org/a");
        assert_eq!(reader.byte().unwrap(), 7);
        assert!(reader.is_exhausted());
        assert!(reader.byte().is_err());
    }

    #[test]
    fn test_reader_truncated_string() {
        let mut buf = Vec::new();
        encode_varint(10, &mut buf);
        buf.extend_from_slice(b"abc");
        let mut reader = ByteReader::new(&buf);
        assert!(reader.string().is_err());
    }
}
