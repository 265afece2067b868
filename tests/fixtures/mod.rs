#![allow(dead_code)]

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use tracespool::proto::packet::{
    clock_snapshot, sequence_flags, service_event, snapshot_clock, trace, trace_packet,
    trace_packet_defaults, INTERNING_ID_FIELD,
};
use tracespool::proto::write_varint;
use tracespool::{Config, PacketSink, ServiceEventKind, SortedPacket, TraceProcessor};

pub fn varint_field(field_id: u32, value: u64, out: &mut Vec<u8>) {
    write_varint(u64::from(field_id) << 3, out);
    write_varint(value, out);
}

pub fn bytes_field(field_id: u32, payload: &[u8], out: &mut Vec<u8>) {
    write_varint(u64::from(field_id) << 3 | 2, out);
    write_varint(payload.len() as u64, out);
    out.extend_from_slice(payload);
}

/// One clock tuple for [`PacketBuilder::clock_snapshot`].
#[derive(Clone, Copy)]
pub struct SnapshotClock {
    pub clock_id: u64,
    pub timestamp: u64,
    pub is_incremental: bool,
    pub unit_multiplier_ns: u64,
}

impl SnapshotClock {
    pub fn absolute(clock_id: u64, timestamp: u64) -> Self {
        Self { clock_id, timestamp, is_incremental: false, unit_multiplier_ns: 0 }
    }
}

/// Builds one trace packet body, field by field.
#[derive(Default)]
pub struct PacketBuilder {
    body: Vec<u8>,
    interned: Vec<u8>,
}

impl PacketBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestamp(mut self, ts: u64) -> Self {
        varint_field(trace_packet::TIMESTAMP, ts, &mut self.body);
        self
    }

    pub fn sequence_id(mut self, id: u32) -> Self {
        varint_field(trace_packet::TRUSTED_PACKET_SEQUENCE_ID, u64::from(id), &mut self.body);
        self
    }

    pub fn sequence_flags(mut self, flags: u32) -> Self {
        varint_field(trace_packet::SEQUENCE_FLAGS, u64::from(flags), &mut self.body);
        self
    }

    pub fn needs_incremental_state(self) -> Self {
        self.sequence_flags(sequence_flags::NEEDS_INCREMENTAL_STATE)
    }

    pub fn incremental_state_cleared(mut self) -> Self {
        varint_field(trace_packet::INCREMENTAL_STATE_CLEARED, 1, &mut self.body);
        self
    }

    pub fn previous_packet_dropped(mut self) -> Self {
        varint_field(trace_packet::PREVIOUS_PACKET_DROPPED, 1, &mut self.body);
        self
    }

    pub fn timestamp_clock_id(mut self, clock_id: u32) -> Self {
        varint_field(trace_packet::TIMESTAMP_CLOCK_ID, u64::from(clock_id), &mut self.body);
        self
    }

    /// Opaque payload on an arbitrary packet field (e.g. a track event).
    pub fn payload(mut self, field_id: u32, bytes: &[u8]) -> Self {
        bytes_field(field_id, bytes, &mut self.body);
        self
    }

    /// Adds one interned submessage (`iid` + a name field) under `field_id`
    /// inside the packet's interned data.
    pub fn interned_entry(mut self, field_id: u32, iid: u64, name: &[u8]) -> Self {
        let mut entry = Vec::new();
        varint_field(INTERNING_ID_FIELD, iid, &mut entry);
        bytes_field(2, name, &mut entry);
        bytes_field(field_id, &entry, &mut self.interned);
        self
    }

    pub fn defaults_timestamp_clock_id(mut self, clock_id: u32) -> Self {
        let mut defaults = Vec::new();
        varint_field(trace_packet_defaults::TIMESTAMP_CLOCK_ID, u64::from(clock_id), &mut defaults);
        bytes_field(trace_packet::TRACE_PACKET_DEFAULTS, &defaults, &mut self.body);
        self
    }

    pub fn clock_snapshot(mut self, clocks: &[SnapshotClock], primary: Option<u64>) -> Self {
        let mut snapshot = Vec::new();
        for clock in clocks {
            let mut entry = Vec::new();
            varint_field(snapshot_clock::CLOCK_ID, clock.clock_id, &mut entry);
            varint_field(snapshot_clock::TIMESTAMP, clock.timestamp, &mut entry);
            if clock.is_incremental {
                varint_field(snapshot_clock::IS_INCREMENTAL, 1, &mut entry);
            }
            if clock.unit_multiplier_ns != 0 {
                varint_field(snapshot_clock::UNIT_MULTIPLIER_NS, clock.unit_multiplier_ns, &mut entry);
            }
            bytes_field(clock_snapshot::CLOCKS, &entry, &mut snapshot);
        }
        if let Some(primary) = primary {
            varint_field(clock_snapshot::PRIMARY_TRACE_CLOCK, primary, &mut snapshot);
        }
        bytes_field(trace_packet::CLOCK_SNAPSHOT, &snapshot, &mut self.body);
        self
    }

    /// Adds a service event with the given bool field set.
    pub fn service_event(mut self, flag_field: u32) -> Self {
        let mut event = Vec::new();
        varint_field(flag_field, 1, &mut event);
        bytes_field(trace_packet::SERVICE_EVENT, &event, &mut self.body);
        self
    }

    pub fn frame_timeline_event(mut self) -> Self {
        bytes_field(trace_packet::FRAME_TIMELINE_EVENT, b"", &mut self.body);
        self
    }

    pub fn extension_descriptor(mut self, extension_set: &[u8]) -> Self {
        let mut descriptor = Vec::new();
        bytes_field(1, extension_set, &mut descriptor);
        bytes_field(trace_packet::EXTENSION_DESCRIPTOR, &descriptor, &mut self.body);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        if !self.interned.is_empty() {
            let interned = std::mem::take(&mut self.interned);
            bytes_field(trace_packet::INTERNED_DATA, &interned, &mut self.body);
        }
        self.body
    }
}

/// Frames packet bodies into a trace stream.
#[derive(Default)]
pub struct TraceBuilder {
    buf: Vec<u8>,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packet(self, builder: PacketBuilder) -> Self {
        self.raw_packet(&builder.build())
    }

    pub fn raw_packet(mut self, body: &[u8]) -> Self {
        write_varint(u64::from(trace::PACKET) << 3 | 2, &mut self.buf);
        write_varint(body.len() as u64, &mut self.buf);
        self.buf.extend_from_slice(body);
        self
    }

    /// Wraps previously framed packets into a compressed batch packet.
    pub fn compressed(self, inner: &[u8]) -> Self {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(inner).expect("compress batch");
        let deflated = encoder.finish().expect("finish compress");

        let mut body = Vec::new();
        bytes_field(trace_packet::COMPRESSED_PACKETS, &deflated, &mut body);
        self.raw_packet(&body)
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// Flush barrier packet at `ts`.
pub fn flush_packet(ts: u64) -> PacketBuilder {
    PacketBuilder::new()
        .timestamp(ts)
        .service_event(service_event::ALL_DATA_SOURCES_FLUSHED)
}

/// Sink capturing releases and service events for assertions.
#[derive(Clone, Default)]
pub struct Collector {
    pub packets: Rc<RefCell<Vec<SortedPacket>>>,
    pub events: Rc<RefCell<Vec<(ServiceEventKind, i64)>>>,
}

impl PacketSink for Collector {
    fn on_packet(&mut self, packet: SortedPacket) {
        self.packets.borrow_mut().push(packet);
    }

    fn on_service_event(&mut self, kind: ServiceEventKind, timestamp: i64) {
        self.events.borrow_mut().push((kind, timestamp));
    }
}

impl Collector {
    pub fn released_timestamps(&self) -> Vec<i64> {
        self.packets.borrow().iter().map(|packet| packet.timestamp).collect()
    }

    pub fn released_bodies(&self) -> Vec<Vec<u8>> {
        self.packets.borrow().iter().map(|packet| packet.view.data().to_vec()).collect()
    }
}

pub fn processor_with_collector(config: Config) -> (TraceProcessor, Collector) {
    let collector = Collector::default();
    (TraceProcessor::new(config, Box::new(collector.clone())), collector)
}
