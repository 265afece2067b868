//! Streaming field decoder over a raw message buffer.

use thiserror::Error;

use super::varint::read_varint;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed varint at offset {offset}")]
    MalformedVarint { offset: usize },

    #[error("zero field id at offset {offset}")]
    ZeroFieldId { offset: usize },

    #[error("field {field_id} has unsupported wire type {wire_type}")]
    UnsupportedWireType { field_id: u32, wire_type: u8 },

    #[error("field {field_id} extends past the end of the buffer")]
    Truncated { field_id: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LenDelimited,
    Fixed32,
}

impl WireType {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(WireType::Varint),
            1 => Some(WireType::Fixed64),
            2 => Some(WireType::LenDelimited),
            5 => Some(WireType::Fixed32),
            _ => None,
        }
    }
}

/// One decoded field.
///
/// Scalar fields carry their value bits; length-delimited fields carry a
/// borrowed payload plus its absolute offset within the decoder's input, so
/// the caller can re-window the owning blob without copying.
#[derive(Clone, Copy, Debug)]
pub struct ProtoField<'a> {
    id: u32,
    wire_type: WireType,
    value: u64,
    payload: &'a [u8],
    offset: usize,
}

impl<'a> ProtoField<'a> {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    pub fn as_u64(&self) -> u64 {
        self.value
    }

    pub fn as_u32(&self) -> u32 {
        self.value as u32
    }

    pub fn as_i64(&self) -> i64 {
        self.value as i64
    }

    pub fn as_bool(&self) -> bool {
        self.value != 0
    }

    /// Payload of a length-delimited field; empty for scalar fields.
    pub fn bytes(&self) -> &'a [u8] {
        self.payload
    }

    /// Absolute offset of the payload within the decoder's input buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }
}

/// Pull decoder over a tag-length-value message body.
pub struct ProtoDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ProtoDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed. Nonzero after the last successful
    /// `read_field` call means the message could not be parsed fully.
    pub fn bytes_left(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Reads the next field, or `Ok(None)` at end of input.
    pub fn read_field(&mut self) -> Result<Option<ProtoField<'a>>, DecodeError> {
        if self.pos == self.buf.len() {
            return Ok(None);
        }
        let tag_offset = self.pos;
        let (tag, tag_len) = read_varint(&self.buf[self.pos..])
            .ok_or(DecodeError::MalformedVarint { offset: tag_offset })?;
        let field_id = u32::try_from(tag >> 3)
            .map_err(|_| DecodeError::MalformedVarint { offset: tag_offset })?;
        if field_id == 0 {
            return Err(DecodeError::ZeroFieldId { offset: tag_offset });
        }
        let wire_bits = (tag & 0x7) as u8;
        let wire_type = WireType::from_bits(wire_bits)
            .ok_or(DecodeError::UnsupportedWireType { field_id, wire_type: wire_bits })?;
        self.pos += tag_len;

        match wire_type {
            WireType::Varint => {
                let (value, len) = read_varint(&self.buf[self.pos..])
                    .ok_or(DecodeError::MalformedVarint { offset: self.pos })?;
                self.pos += len;
                Ok(Some(ProtoField { id: field_id, wire_type, value, payload: &[], offset: 0 }))
            }
            WireType::Fixed64 => {
                let value = self.read_fixed::<8>(field_id)?;
                Ok(Some(ProtoField { id: field_id, wire_type, value, payload: &[], offset: 0 }))
            }
            WireType::Fixed32 => {
                let value = self.read_fixed::<4>(field_id)?;
                Ok(Some(ProtoField { id: field_id, wire_type, value, payload: &[], offset: 0 }))
            }
            WireType::LenDelimited => {
                let (len, len_len) = read_varint(&self.buf[self.pos..])
                    .ok_or(DecodeError::MalformedVarint { offset: self.pos })?;
                self.pos += len_len;
                let len = usize::try_from(len).map_err(|_| DecodeError::Truncated { field_id })?;
                if len > self.buf.len() - self.pos {
                    return Err(DecodeError::Truncated { field_id });
                }
                let offset = self.pos;
                let payload = &self.buf[offset..offset + len];
                self.pos += len;
                Ok(Some(ProtoField { id: field_id, wire_type, value: 0, payload, offset }))
            }
        }
    }

    fn read_fixed<const N: usize>(&mut self, field_id: u32) -> Result<u64, DecodeError> {
        if self.buf.len() - self.pos < N {
            return Err(DecodeError::Truncated { field_id });
        }
        let mut raw = [0u8; 8];
        raw[..N].copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(u64::from_le_bytes(raw))
    }
}
