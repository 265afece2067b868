//! Stream reframing: chunk boundaries to self-contained packet blobs.
//!
//! The tokenizer consumes an append-only sequence of input chunks, cuts the
//! length-prefixed packets back out of them, and hands each packet body to
//! the caller as a view into the original chunk. Only packets straddling a
//! chunk boundary are copied, into a small carry buffer. Compressed packet
//! batches are inflated and re-tokenized in place, so nested batches
//! flatten and no emitted view ever crosses a decompression boundary.

use std::io::Read;

use thiserror::Error;

use crate::blob::TraceBlobView;
use crate::proto::packet::{trace, trace_packet};
use crate::proto::varint::{read_varint, MAX_VARINT_LEN};
use crate::proto::{ProtoDecoder, WireType};
use crate::Result;

/// Upper bound on a single packet's length prefix. A larger prefix means the
/// framing is corrupt.
pub const MAX_PACKET_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TokenizeError {
    #[error("malformed varint in packet framing")]
    MalformedVarint,

    #[error("unexpected top-level field {field_id} in trace stream")]
    UnexpectedField { field_id: u32 },

    #[error("packet length {got_bytes} exceeds the {max_bytes} byte limit")]
    PacketTooLarge { max_bytes: usize, got_bytes: usize },

    #[error("trace ended mid-packet ({pending} bytes pending)")]
    TruncatedPacket { pending: usize },

    #[error("malformed compressed packet batch")]
    MalformedCompressedBatch,

    #[error("failed to decompress packet batch: {source}")]
    Decompression {
        #[source]
        source: std::io::Error,
    },
}

/// Header of one length-prefixed packet: prefix length and body length.
fn frame_header(buf: &[u8]) -> std::result::Result<Option<(usize, usize)>, TokenizeError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let Some((tag, tag_len)) = read_varint(buf) else {
        if buf.len() >= MAX_VARINT_LEN {
            return Err(TokenizeError::MalformedVarint);
        }
        return Ok(None);
    };
    let field_id = (tag >> 3) as u32;
    if field_id != trace::PACKET || tag & 0x7 != 2 {
        return Err(TokenizeError::UnexpectedField { field_id });
    }
    let Some((len, len_len)) = read_varint(&buf[tag_len..]) else {
        if buf.len() - tag_len >= MAX_VARINT_LEN {
            return Err(TokenizeError::MalformedVarint);
        }
        return Ok(None);
    };
    let len = usize::try_from(len).unwrap_or(usize::MAX);
    if len > MAX_PACKET_BYTES {
        return Err(TokenizeError::PacketTooLarge { max_bytes: MAX_PACKET_BYTES, got_bytes: len });
    }
    Ok(Some((tag_len + len_len, len)))
}

fn first_field_id(buf: &[u8]) -> Option<u32> {
    let (tag, _) = read_varint(buf)?;
    Some((tag >> 3) as u32)
}

fn inflate(data: &[u8]) -> std::result::Result<Vec<u8>, TokenizeError> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|source| TokenizeError::Decompression { source })?;
    Ok(out)
}

#[derive(Default)]
pub struct TraceTokenizer {
    carry: Vec<u8>,
}

impl TraceTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one input chunk, emitting every packet it completes.
    ///
    /// `emit` receives the packet body view; its error aborts tokenization.
    pub fn tokenize(
        &mut self,
        chunk: TraceBlobView,
        emit: &mut dyn FnMut(TraceBlobView) -> Result<()>,
    ) -> Result<()> {
        let mut pos = 0usize;

        // Complete the packet pending from the previous chunk first. The
        // carry never holds more than one packet.
        while !self.carry.is_empty() {
            match frame_header(&self.carry)? {
                None => {
                    if pos == chunk.len() {
                        return Ok(());
                    }
                    self.carry.push(chunk.data()[pos]);
                    pos += 1;
                }
                Some((header_len, body_len)) => {
                    let total = header_len + body_len;
                    if self.carry.len() < total {
                        let missing = total - self.carry.len();
                        let take = missing.min(chunk.len() - pos);
                        self.carry.extend_from_slice(&chunk.data()[pos..pos + take]);
                        pos += take;
                        if self.carry.len() < total {
                            return Ok(());
                        }
                    }
                    let view = TraceBlobView::from_vec(std::mem::take(&mut self.carry));
                    self.process_packet(view.slice(header_len, body_len), emit)?;
                }
            }
        }

        // Zero-copy over the remainder of the chunk.
        while pos < chunk.len() {
            let Some((header_len, body_len)) = frame_header(&chunk.data()[pos..])? else {
                self.carry.extend_from_slice(&chunk.data()[pos..]);
                return Ok(());
            };
            if pos + header_len + body_len > chunk.len() {
                self.carry.extend_from_slice(&chunk.data()[pos..]);
                return Ok(());
            }
            let view = chunk.slice(pos + header_len, body_len);
            pos += header_len + body_len;
            self.process_packet(view, emit)?;
        }
        Ok(())
    }

    /// Signals end of input. A nonempty carry means the stream ended
    /// mid-packet.
    pub fn finish(&mut self) -> Result<()> {
        if self.carry.is_empty() {
            return Ok(());
        }
        Err(TokenizeError::TruncatedPacket { pending: self.carry.len() }.into())
    }

    fn process_packet(
        &mut self,
        view: TraceBlobView,
        emit: &mut dyn FnMut(TraceBlobView) -> Result<()>,
    ) -> Result<()> {
        if first_field_id(view.data()) == Some(trace_packet::COMPRESSED_PACKETS) {
            return self.process_compressed(&view, emit);
        }
        emit(view)
    }

    /// Inflates each compressed batch in the packet and re-tokenizes the
    /// inflated content as inline packets.
    fn process_compressed(
        &mut self,
        view: &TraceBlobView,
        emit: &mut dyn FnMut(TraceBlobView) -> Result<()>,
    ) -> Result<()> {
        let mut decoder = ProtoDecoder::new(view.data());
        loop {
            match decoder.read_field() {
                Ok(Some(field))
                    if field.id() == trace_packet::COMPRESSED_PACKETS
                        && field.wire_type() == WireType::LenDelimited =>
                {
                    let inflated = inflate(field.bytes())?;
                    self.tokenize_complete(&TraceBlobView::from_vec(inflated), emit)?;
                }
                Ok(Some(_)) => {}
                Ok(None) => return Ok(()),
                Err(_) => return Err(TokenizeError::MalformedCompressedBatch.into()),
            }
        }
    }

    /// Tokenizes a buffer that must contain whole packets only (inflated
    /// batch content).
    fn tokenize_complete(
        &mut self,
        view: &TraceBlobView,
        emit: &mut dyn FnMut(TraceBlobView) -> Result<()>,
    ) -> Result<()> {
        let mut pos = 0usize;
        while pos < view.len() {
            let Some((header_len, body_len)) = frame_header(&view.data()[pos..])? else {
                return Err(
                    TokenizeError::TruncatedPacket { pending: view.len() - pos }.into(),
                );
            };
            if pos + header_len + body_len > view.len() {
                return Err(
                    TokenizeError::TruncatedPacket { pending: view.len() - pos }.into(),
                );
            }
            let packet = view.slice(pos + header_len, body_len);
            pos += header_len + body_len;
            self.process_packet(packet, emit)?;
        }
        Ok(())
    }
}
