//! Protocol-buffer wire-format primitives.
//!
//! Tags are `(field_number << 3) | wire_type`. Only the three wire types
//! the envelope schema needs are supported: varint, 64-bit, and
//! length-delimited. Unknown fields are skippable so either peer can add
//! fields without breaking the other.

use thiserror::Error;

pub const WIRE_VARINT: u32 = 0;
pub const WIRE_FIXED64: u32 = 1;
pub const WIRE_LEN: u32 = 2;
pub const WIRE_FIXED32: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message truncated")]
    Truncated,
    #[error("varint field does not terminate")]
    Overflow,
    #[error("unsupported wire type {0}")]
    WireType(u32),
    #[error("field {field}: got wire type {got}, expected {want}")]
    UnexpectedWireType { field: u32, got: u32, want: u32 },
    #[error("string field is not valid utf-8")]
    Utf8,
    #[error("{0}")]
    Malformed(String),
}

pub(crate) fn malformed(message: impl Into<String>) -> DecodeError {
    DecodeError::Malformed(message.into())
}

/// Append-only encoder for one message body.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn raw_varint(&mut self, mut value: u64) {
        loop {
            let low = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(low);
                return;
            }
            self.buf.push(low | 0x80);
        }
    }

    fn tag(&mut self, field: u32, wire_type: u32) {
        self.raw_varint(u64::from(field << 3 | wire_type));
    }

    /// Varint field, skipped when zero.
    pub fn uint32(&mut self, field: u32, value: u32) {
        if value != 0 {
            self.uint32_always(field, value);
        }
    }

    /// Varint field, emitted even when zero (oneof arms need presence).
    pub fn uint32_always(&mut self, field: u32, value: u32) {
        self.tag(field, WIRE_VARINT);
        self.raw_varint(u64::from(value));
    }

    pub fn uint64(&mut self, field: u32, value: u64) {
        if value != 0 {
            self.tag(field, WIRE_VARINT);
            self.raw_varint(value);
        }
    }

    pub fn boolean(&mut self, field: u32, value: bool) {
        if value {
            self.tag(field, WIRE_VARINT);
            self.raw_varint(1);
        }
    }

    pub fn double(&mut self, field: u32, value: f64) {
        if value != 0.0 {
            self.tag(field, WIRE_FIXED64);
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    /// Length-delimited string field, skipped when empty.
    pub fn string(&mut self, field: u32, value: &str) {
        if !value.is_empty() {
            self.string_always(field, value);
        }
    }

    /// Length-delimited string field, emitted even when empty.
    pub fn string_always(&mut self, field: u32, value: &str) {
        self.tag(field, WIRE_LEN);
        self.raw_varint(value.len() as u64);
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Nested message field; always emitted so oneof presence survives
    /// even when every inner field holds its default.
    pub fn message(&mut self, field: u32, encode: impl FnOnce(&mut Writer)) {
        let mut inner = Writer::new();
        encode(&mut inner);
        let body = inner.into_bytes();
        self.tag(field, WIRE_LEN);
        self.raw_varint(body.len() as u64);
        self.buf.extend_from_slice(&body);
    }
}

/// Bounded decoder over one message body.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn raw_varint(&mut self) -> Result<u64, DecodeError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        for _ in 0..10 {
            let byte = *self.buf.get(self.pos).ok_or(DecodeError::Truncated)?;
            self.pos += 1;
            let low = u64::from(byte & 0x7f);
            if shift == 63 && low > 1 {
                return Err(DecodeError::Overflow);
            }
            value |= low << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
        Err(DecodeError::Overflow)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(len).ok_or(DecodeError::Truncated)?;
        if end > self.buf.len() {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Next `(field, wire_type)` pair, or `None` at end of the body.
    pub fn next_tag(&mut self) -> Result<Option<(u32, u32)>, DecodeError> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let tag = self.raw_varint()?;
        let field = (tag >> 3) as u32;
        let wire_type = (tag & 0x7) as u32;
        if field == 0 {
            return Err(malformed("field number zero"));
        }
        Ok(Some((field, wire_type)))
    }

    fn expect(field: u32, got: u32, want: u32) -> Result<(), DecodeError> {
        if got == want {
            Ok(())
        } else {
            Err(DecodeError::UnexpectedWireType { field, got, want })
        }
    }

    pub fn uint64(&mut self, field: u32, wire_type: u32) -> Result<u64, DecodeError> {
        Self::expect(field, wire_type, WIRE_VARINT)?;
        self.raw_varint()
    }

    pub fn uint32(&mut self, field: u32, wire_type: u32) -> Result<u32, DecodeError> {
        let value = self.uint64(field, wire_type)?;
        u32::try_from(value).map_err(|_| malformed(format!("field {field} exceeds u32 range")))
    }

    pub fn boolean(&mut self, field: u32, wire_type: u32) -> Result<bool, DecodeError> {
        Ok(self.uint64(field, wire_type)? != 0)
    }

    pub fn double(&mut self, field: u32, wire_type: u32) -> Result<f64, DecodeError> {
        Self::expect(field, wire_type, WIRE_FIXED64)?;
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    pub fn bytes(&mut self, field: u32, wire_type: u32) -> Result<&'a [u8], DecodeError> {
        Self::expect(field, wire_type, WIRE_LEN)?;
        let len = self.raw_varint()?;
        let len = usize::try_from(len).map_err(|_| DecodeError::Truncated)?;
        self.take(len)
    }

    pub fn string(&mut self, field: u32, wire_type: u32) -> Result<String, DecodeError> {
        let bytes = self.bytes(field, wire_type)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::Utf8)
    }

    /// Bounded reader over a nested message field.
    pub fn sub(&mut self, field: u32, wire_type: u32) -> Result<Reader<'a>, DecodeError> {
        Ok(Reader::new(self.bytes(field, wire_type)?))
    }

    /// Skips an unrecognized field.
    pub fn skip(&mut self, field: u32, wire_type: u32) -> Result<(), DecodeError> {
        match wire_type {
            WIRE_VARINT => {
                self.raw_varint()?;
            }
            WIRE_FIXED64 => {
                self.take(8)?;
            }
            WIRE_LEN => {
                let len = self.raw_varint()?;
                let len = usize::try_from(len).map_err(|_| DecodeError::Truncated)?;
                self.take(len)?;
            }
            WIRE_FIXED32 => {
                self.take(4)?;
            }
            other => return Err(DecodeError::WireType(other)),
        }
        let _ = field;
        Ok(())
    }
}
