//! Trace packet decoding: field numbers and the partial packet decoder.
//!
//! Field numbers follow the Perfetto wire protocol. Only the handful of
//! top-level fields the ingestion core acts on are named; everything else is
//! carried opaquely and re-exposed through `field()` for module dispatch.

use crate::blob::TraceBlobView;

use super::decoder::{ProtoDecoder, WireType};

/// Field numbers of the outer stream framing message.
pub mod trace {
    pub const PACKET: u32 = 1;
}

/// Field numbers of a trace packet.
pub mod trace_packet {
    pub const CHROME_EVENTS: u32 = 5;
    pub const CLOCK_SNAPSHOT: u32 = 6;
    pub const TIMESTAMP: u32 = 8;
    pub const TRUSTED_PACKET_SEQUENCE_ID: u32 = 10;
    pub const INTERNED_DATA: u32 = 12;
    pub const SEQUENCE_FLAGS: u32 = 13;
    pub const TRACE_CONFIG: u32 = 33;
    pub const INCREMENTAL_STATE_CLEARED: u32 = 41;
    pub const PREVIOUS_PACKET_DROPPED: u32 = 42;
    pub const COMPRESSED_PACKETS: u32 = 50;
    pub const CHROME_METADATA: u32 = 51;
    pub const TIMESTAMP_CLOCK_ID: u32 = 58;
    pub const TRACE_PACKET_DEFAULTS: u32 = 59;
    pub const EXTENSION_DESCRIPTOR: u32 = 72;
    pub const SERVICE_EVENT: u32 = 73;
    pub const FRAME_TIMELINE_EVENT: u32 = 76;
}

/// Bits of the `sequence_flags` field.
pub mod sequence_flags {
    pub const INCREMENTAL_STATE_CLEARED: u32 = 1;
    pub const NEEDS_INCREMENTAL_STATE: u32 = 2;
}

/// Field numbers of a clock snapshot.
pub mod clock_snapshot {
    pub const CLOCKS: u32 = 1;
    pub const PRIMARY_TRACE_CLOCK: u32 = 2;
}

/// Field numbers of one clock inside a snapshot.
pub mod snapshot_clock {
    pub const CLOCK_ID: u32 = 1;
    pub const TIMESTAMP: u32 = 2;
    pub const IS_INCREMENTAL: u32 = 3;
    pub const UNIT_MULTIPLIER_NS: u32 = 4;
}

/// Field numbers of a tracing service event.
pub mod service_event {
    pub const ALL_DATA_SOURCES_STARTED: u32 = 1;
    pub const TRACING_STARTED: u32 = 2;
    pub const ALL_DATA_SOURCES_FLUSHED: u32 = 3;
    pub const READ_TRACING_BUFFERS_COMPLETED: u32 = 4;
    pub const TRACING_DISABLED: u32 = 5;
}

/// Field numbers of the trace-packet-defaults submessage.
pub mod trace_packet_defaults {
    pub const TIMESTAMP_CLOCK_ID: u32 = 58;
}

/// Field numbers of the trace config submessage the core inspects.
pub mod trace_config {
    pub const WRITE_INTO_FILE: u32 = 8;
    pub const FLUSH_PERIOD_MS: u32 = 13;
}

/// Field numbers of an extension descriptor.
pub mod extension_descriptor {
    pub const EXTENSION_SET: u32 = 1;
}

/// Interned submessages carry their interning id in this field.
pub const INTERNING_ID_FIELD: u32 = 1;

#[derive(Clone, Copy, Debug)]
struct RawField {
    id: u32,
    wire_type: WireType,
    value: u64,
    offset: usize,
    len: usize,
}

/// Single-pass partial decoder for one trace packet.
///
/// Parsing never fails: a malformed field stops the pass and leaves
/// `bytes_left() > 0`, which the reader treats as corruption. For repeated
/// scalar fields the last occurrence wins, per wire-format semantics.
pub struct TracePacketDecoder {
    view: TraceBlobView,
    fields: Vec<RawField>,
    bytes_left: usize,
}

impl TracePacketDecoder {
    pub fn parse(view: &TraceBlobView) -> Self {
        let mut fields = Vec::new();
        let mut decoder = ProtoDecoder::new(view.data());
        let bytes_left = loop {
            match decoder.read_field() {
                Ok(Some(field)) => fields.push(RawField {
                    id: field.id(),
                    wire_type: field.wire_type(),
                    value: field.as_u64(),
                    offset: field.offset(),
                    len: field.len(),
                }),
                Ok(None) => break 0,
                Err(_) => break decoder.bytes_left(),
            }
        };
        Self { view: view.clone(), fields, bytes_left }
    }

    /// Unparsed trailing bytes; nonzero signals a corrupt packet.
    pub fn bytes_left(&self) -> usize {
        self.bytes_left
    }

    /// The packet body this decoder was parsed from.
    pub fn view(&self) -> &TraceBlobView {
        &self.view
    }

    pub fn has_field(&self, field_id: u32) -> bool {
        self.fields.iter().any(|f| f.id == field_id)
    }

    fn field(&self, field_id: u32) -> Option<&RawField> {
        self.fields.iter().rev().find(|f| f.id == field_id)
    }

    fn varint_field(&self, field_id: u32) -> Option<u64> {
        self.field(field_id).map(|f| f.value)
    }

    fn view_field(&self, field_id: u32) -> Option<TraceBlobView> {
        let field = self.field(field_id)?;
        if field.wire_type != WireType::LenDelimited {
            return None;
        }
        Some(self.view.slice(field.offset, field.len))
    }

    pub fn has_timestamp(&self) -> bool {
        self.has_field(trace_packet::TIMESTAMP)
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.varint_field(trace_packet::TIMESTAMP)
    }

    pub fn has_trusted_packet_sequence_id(&self) -> bool {
        self.has_field(trace_packet::TRUSTED_PACKET_SEQUENCE_ID)
    }

    pub fn trusted_packet_sequence_id(&self) -> u32 {
        self.varint_field(trace_packet::TRUSTED_PACKET_SEQUENCE_ID)
            .unwrap_or(0) as u32
    }

    pub fn sequence_flags(&self) -> u32 {
        self.varint_field(trace_packet::SEQUENCE_FLAGS).unwrap_or(0) as u32
    }

    pub fn incremental_state_cleared(&self) -> bool {
        self.varint_field(trace_packet::INCREMENTAL_STATE_CLEARED)
            .unwrap_or(0)
            != 0
    }

    pub fn previous_packet_dropped(&self) -> bool {
        self.varint_field(trace_packet::PREVIOUS_PACKET_DROPPED)
            .unwrap_or(0)
            != 0
    }

    pub fn has_timestamp_clock_id(&self) -> bool {
        self.has_field(trace_packet::TIMESTAMP_CLOCK_ID)
    }

    pub fn timestamp_clock_id(&self) -> Option<u32> {
        self.varint_field(trace_packet::TIMESTAMP_CLOCK_ID).map(|v| v as u32)
    }

    pub fn has_interned_data(&self) -> bool {
        self.has_field(trace_packet::INTERNED_DATA)
    }

    pub fn interned_data(&self) -> Option<TraceBlobView> {
        self.view_field(trace_packet::INTERNED_DATA)
    }

    pub fn has_trace_packet_defaults(&self) -> bool {
        self.has_field(trace_packet::TRACE_PACKET_DEFAULTS)
    }

    pub fn trace_packet_defaults(&self) -> Option<TraceBlobView> {
        self.view_field(trace_packet::TRACE_PACKET_DEFAULTS)
    }

    pub fn has_clock_snapshot(&self) -> bool {
        self.has_field(trace_packet::CLOCK_SNAPSHOT)
    }

    pub fn clock_snapshot(&self) -> Option<TraceBlobView> {
        self.view_field(trace_packet::CLOCK_SNAPSHOT)
    }

    pub fn has_service_event(&self) -> bool {
        self.has_field(trace_packet::SERVICE_EVENT)
    }

    pub fn service_event(&self) -> Option<TraceBlobView> {
        self.view_field(trace_packet::SERVICE_EVENT)
    }

    pub fn has_extension_descriptor(&self) -> bool {
        self.has_field(trace_packet::EXTENSION_DESCRIPTOR)
    }

    pub fn extension_descriptor(&self) -> Option<TraceBlobView> {
        self.view_field(trace_packet::EXTENSION_DESCRIPTOR)
    }

    pub fn has_compressed_packets(&self) -> bool {
        self.has_field(trace_packet::COMPRESSED_PACKETS)
    }

    pub fn has_trace_config(&self) -> bool {
        self.has_field(trace_packet::TRACE_CONFIG)
    }

    pub fn trace_config(&self) -> Option<TraceBlobView> {
        self.view_field(trace_packet::TRACE_CONFIG)
    }

    pub fn has_chrome_events(&self) -> bool {
        self.has_field(trace_packet::CHROME_EVENTS)
    }

    pub fn has_chrome_metadata(&self) -> bool {
        self.has_field(trace_packet::CHROME_METADATA)
    }

    pub fn has_frame_timeline_event(&self) -> bool {
        self.has_field(trace_packet::FRAME_TIMELINE_EVENT)
    }
}

/// Decoded clock snapshot submessage. Lenient: stops at the first malformed
/// field.
pub struct ClockSnapshotDecoder<'a> {
    pub primary_trace_clock: Option<u64>,
    clocks: Vec<&'a [u8]>,
}

impl<'a> ClockSnapshotDecoder<'a> {
    pub fn parse(buf: &'a [u8]) -> Self {
        let mut primary_trace_clock = None;
        let mut clocks = Vec::new();
        let mut decoder = ProtoDecoder::new(buf);
        while let Ok(Some(field)) = decoder.read_field() {
            match field.id() {
                clock_snapshot::CLOCKS if field.wire_type() == WireType::LenDelimited => {
                    clocks.push(field.bytes());
                }
                clock_snapshot::PRIMARY_TRACE_CLOCK => {
                    primary_trace_clock = Some(field.as_u64());
                }
                _ => {}
            }
        }
        Self { primary_trace_clock, clocks }
    }

    pub fn clocks(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        self.clocks.iter().copied()
    }
}

/// One clock tuple inside a snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnapshotClockDecoder {
    pub clock_id: u64,
    pub timestamp: u64,
    pub is_incremental: bool,
    pub unit_multiplier_ns: u64,
}

impl SnapshotClockDecoder {
    pub fn parse(buf: &[u8]) -> Self {
        let mut clock = Self::default();
        let mut decoder = ProtoDecoder::new(buf);
        while let Ok(Some(field)) = decoder.read_field() {
            match field.id() {
                snapshot_clock::CLOCK_ID => clock.clock_id = field.as_u64(),
                snapshot_clock::TIMESTAMP => clock.timestamp = field.as_u64(),
                snapshot_clock::IS_INCREMENTAL => clock.is_incremental = field.as_bool(),
                snapshot_clock::UNIT_MULTIPLIER_NS => {
                    clock.unit_multiplier_ns = field.as_u64();
                }
                _ => {}
            }
        }
        clock
    }
}

/// Tracing service lifecycle event flags.
#[derive(Clone, Copy, Debug, Default)]
pub struct ServiceEventDecoder {
    pub all_data_sources_started: bool,
    pub tracing_started: bool,
    pub all_data_sources_flushed: bool,
    pub read_tracing_buffers_completed: bool,
    pub tracing_disabled: bool,
}

impl ServiceEventDecoder {
    pub fn parse(buf: &[u8]) -> Self {
        let mut event = Self::default();
        let mut decoder = ProtoDecoder::new(buf);
        while let Ok(Some(field)) = decoder.read_field() {
            match field.id() {
                service_event::ALL_DATA_SOURCES_STARTED => {
                    event.all_data_sources_started = field.as_bool();
                }
                service_event::TRACING_STARTED => event.tracing_started = field.as_bool(),
                service_event::ALL_DATA_SOURCES_FLUSHED => {
                    event.all_data_sources_flushed = field.as_bool();
                }
                service_event::READ_TRACING_BUFFERS_COMPLETED => {
                    event.read_tracing_buffers_completed = field.as_bool();
                }
                service_event::TRACING_DISABLED => event.tracing_disabled = field.as_bool(),
                _ => {}
            }
        }
        event
    }
}

/// Trace-packet-defaults fields the core acts on.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracePacketDefaultsDecoder {
    pub timestamp_clock_id: Option<u32>,
}

impl TracePacketDefaultsDecoder {
    pub fn parse(buf: &[u8]) -> Self {
        let mut defaults = Self::default();
        let mut decoder = ProtoDecoder::new(buf);
        while let Ok(Some(field)) = decoder.read_field() {
            if field.id() == trace_packet_defaults::TIMESTAMP_CLOCK_ID {
                defaults.timestamp_clock_id = Some(field.as_u32());
            }
        }
        defaults
    }
}

/// Trace config fields the core acts on.
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceConfigDecoder {
    pub write_into_file: bool,
    pub flush_period_ms: u64,
}

impl TraceConfigDecoder {
    pub fn parse(buf: &[u8]) -> Self {
        let mut config = Self::default();
        let mut decoder = ProtoDecoder::new(buf);
        while let Ok(Some(field)) = decoder.read_field() {
            match field.id() {
                trace_config::WRITE_INTO_FILE => config.write_into_file = field.as_bool(),
                trace_config::FLUSH_PERIOD_MS => config.flush_period_ms = field.as_u64(),
                _ => {}
            }
        }
        config
    }
}

/// Reads the interning id out of an interned submessage.
pub fn read_interning_id(buf: &[u8]) -> Option<u64> {
    let mut decoder = ProtoDecoder::new(buf);
    while let Ok(Some(field)) = decoder.read_field() {
        if field.id() == INTERNING_ID_FIELD && field.wire_type() == WireType::Varint {
            return Some(field.as_u64());
        }
    }
    None
}
