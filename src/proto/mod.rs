//! Partial tag-length-value wire decoding.
//!
//! The decoders here never materialize whole messages: they yield field
//! windows into the source blob and only the accessors the higher layers
//! actually use read values out of them.

pub mod decoder;
pub mod packet;
pub mod varint;

pub use decoder::{DecodeError, ProtoDecoder, ProtoField, WireType};
pub use packet::{
    ClockSnapshotDecoder, ServiceEventDecoder, SnapshotClockDecoder, TraceConfigDecoder,
    TracePacketDecoder, TracePacketDefaultsDecoder, read_interning_id,
};
pub use varint::{read_varint, write_varint};
