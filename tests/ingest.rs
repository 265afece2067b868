//! End-to-end ingestion scenarios through the public processor API.

mod fixtures;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use tracespool::proto::packet::service_event;
use tracespool::{
    sequence_scoped_to_global, Config, ErrorKind, IngestStat, ModuleResult, ParserModule,
    SequenceGeneration, ServiceEventKind, SortingMode, TraceBlobView, TraceProcessor,
};

use fixtures::{
    flush_packet, processor_with_collector, Collector, PacketBuilder, SnapshotClock, TraceBuilder,
};

const BOOTTIME: u64 = 6;
const EVENT_FIELD: u32 = 11;
const NAME_FIELD: u32 = 2;

fn ingest(stream: Vec<u8>) -> (TraceProcessor, Collector) {
    let (mut processor, collector) = processor_with_collector(Config::default());
    processor.parse(stream).expect("parse stream");
    processor.notify_end_of_file().expect("end of file");
    (processor, collector)
}

#[test]
fn heuristic_mode_releases_in_timestamp_order_at_flush() {
    let stream = TraceBuilder::new()
        .packet(PacketBuilder::new().sequence_id(1).timestamp(100).payload(EVENT_FIELD, b"a"))
        .packet(PacketBuilder::new().sequence_id(1).timestamp(200).payload(EVENT_FIELD, b"b"))
        .packet(PacketBuilder::new().sequence_id(1).timestamp(150).payload(EVENT_FIELD, b"c"))
        .packet(flush_packet(300))
        .build();

    let (mut processor, collector) = processor_with_collector(Config::default());
    processor.parse(stream).expect("parse stream");
    // The barrier alone must have released everything.
    assert_eq!(collector.released_timestamps(), vec![100, 150, 200]);
    assert_eq!(
        collector.events.borrow().as_slice(),
        &[(ServiceEventKind::AllDataSourcesFlushed, 300)]
    );
    processor.notify_end_of_file().expect("end of file");
    assert_eq!(collector.released_timestamps(), vec![100, 150, 200]);
}

#[test]
fn sequence_scoped_clock_translates_to_trace_time() {
    let stream = TraceBuilder::new()
        .packet(PacketBuilder::new().sequence_id(7).clock_snapshot(
            &[
                SnapshotClock::absolute(BOOTTIME, 1_000_000),
                SnapshotClock::absolute(64, 0),
            ],
            None,
        ))
        .packet(
            PacketBuilder::new()
                .sequence_id(7)
                .timestamp(500)
                .timestamp_clock_id(64)
                .payload(EVENT_FIELD, b"a"),
        )
        .packet(
            PacketBuilder::new()
                .sequence_id(7)
                .timestamp(1500)
                .timestamp_clock_id(64)
                .payload(EVENT_FIELD, b"b"),
        )
        .build();

    let (processor, collector) = ingest(stream);
    assert_eq!(collector.released_timestamps(), vec![1_000_500, 1_001_500]);

    // Diagnostics: one row per clock in the snapshot, same trace instant.
    let rows = processor.clock_snapshots();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.ts == 1_000_000));
    assert!(rows.iter().all(|row| row.snapshot_id == 0));
    let boot = rows.iter().find(|row| row.clock_id == BOOTTIME).expect("boottime row");
    assert_eq!(boot.clock_name, Some("BOOTTIME"));
    assert_eq!(boot.clock_value, 1_000_000);
    let scoped = rows
        .iter()
        .find(|row| row.clock_id == sequence_scoped_to_global(7, 64))
        .expect("scoped row");
    assert_eq!(scoped.clock_name, None);
    assert_eq!(scoped.clock_value, 0);
}

fn interned_name(generation: &Arc<SequenceGeneration>, iid: u64) -> Option<Vec<u8>> {
    generation
        .interned_message(NAME_FIELD, iid)
        .map(|view: TraceBlobView| view.data().to_vec())
}

#[test]
fn interning_resolves_against_the_generation_at_push_time() {
    let stream = TraceBuilder::new()
        .packet(
            PacketBuilder::new()
                .sequence_id(1)
                .incremental_state_cleared()
                .timestamp(10)
                .interned_entry(NAME_FIELD, 1, b"foo")
                .payload(EVENT_FIELD, b"first"),
        )
        .packet(
            PacketBuilder::new()
                .sequence_id(1)
                .incremental_state_cleared()
                .timestamp(20)
                .interned_entry(NAME_FIELD, 1, b"bar")
                .payload(EVENT_FIELD, b"second"),
        )
        .build();

    let (_, collector) = ingest(stream);
    let packets = collector.packets.borrow();
    assert_eq!(packets.len(), 2);

    // Each packet sees the interning of its own generation; the interned
    // submessage carries the iid followed by the name.
    let first = interned_name(&packets[0].generation, 1).expect("foo resolves");
    assert!(first.ends_with(b"foo"));
    let second = interned_name(&packets[1].generation, 1).expect("bar resolves");
    assert!(second.ends_with(b"bar"));
}

#[test]
fn packet_loss_invalidates_interning_until_next_clear() {
    let stream = TraceBuilder::new()
        // No clear yet: this interned entry arrives on an invalid sequence.
        .packet(
            PacketBuilder::new()
                .sequence_id(2)
                .timestamp(5)
                .interned_entry(NAME_FIELD, 1, b"x")
                .payload(EVENT_FIELD, b"first"),
        )
        .packet(
            PacketBuilder::new()
                .sequence_id(2)
                .timestamp(10)
                .previous_packet_dropped()
                .payload(EVENT_FIELD, b"second"),
        )
        .packet(
            PacketBuilder::new()
                .sequence_id(2)
                .timestamp(15)
                .incremental_state_cleared()
                .interned_entry(NAME_FIELD, 1, b"y")
                .payload(EVENT_FIELD, b"third"),
        )
        .build();

    let (processor, collector) = ingest(stream);
    let packets = collector.packets.borrow();
    assert_eq!(packets.len(), 3);

    // Interning before the clear was skipped, not stored.
    assert_eq!(processor.stats().value(IngestStat::TokenizerSkippedPackets), 1);
    assert!(interned_name(&packets[0].generation, 1).is_none());
    assert!(interned_name(&packets[1].generation, 1).is_none());
    // After the clear the new generation resolves.
    assert!(interned_name(&packets[2].generation, 1).expect("y resolves").ends_with(b"y"));
}

#[test]
fn undated_packets_pin_to_the_timestamp_frontier() {
    let stream = TraceBuilder::new()
        .packet(PacketBuilder::new().sequence_id(1).timestamp(100).payload(EVENT_FIELD, b"a"))
        .packet(PacketBuilder::new().sequence_id(1).payload(EVENT_FIELD, b"b"))
        .packet(PacketBuilder::new().sequence_id(1).timestamp(90).payload(EVENT_FIELD, b"c"))
        .packet(flush_packet(200))
        .build();

    let (_, collector) = ingest(stream);
    assert_eq!(collector.released_timestamps(), vec![90, 100, 100]);
    // The tie at 100 is stable: the dated packet was pushed first.
    let bodies = collector.released_bodies();
    assert!(bodies[1].ends_with(b"a"));
    assert!(bodies[2].ends_with(b"b"));
}

#[test]
fn unresolvable_clock_drops_the_packet_and_counts_it() {
    let stream = TraceBuilder::new()
        .packet(
            PacketBuilder::new()
                .sequence_id(1)
                .timestamp(10)
                .timestamp_clock_id(555)
                .payload(EVENT_FIELD, b"dropped"),
        )
        .packet(PacketBuilder::new().sequence_id(1).timestamp(20).payload(EVENT_FIELD, b"kept"))
        .build();

    let (processor, collector) = ingest(stream);
    assert_eq!(processor.stats().value(IngestStat::ClockSyncFailure), 1);
    assert_eq!(collector.released_timestamps(), vec![20]);
    assert!(collector.released_bodies()[0].ends_with(b"kept"));
}

#[test]
fn chunked_and_whole_streams_release_identically() {
    let stream = TraceBuilder::new()
        .packet(PacketBuilder::new().sequence_id(7).clock_snapshot(
            &[
                SnapshotClock::absolute(BOOTTIME, 1_000),
                SnapshotClock::absolute(64, 0),
            ],
            None,
        ))
        .packet(
            PacketBuilder::new()
                .sequence_id(7)
                .timestamp(50)
                .timestamp_clock_id(64)
                .payload(EVENT_FIELD, b"scoped"),
        )
        .packet(PacketBuilder::new().sequence_id(1).timestamp(2_000).payload(EVENT_FIELD, b"late"))
        .packet(flush_packet(3_000))
        .packet(PacketBuilder::new().sequence_id(1).timestamp(4_000).payload(EVENT_FIELD, b"tail"))
        .build();

    let whole = {
        let (_, collector) = ingest(stream.clone());
        let result = collector
            .packets
            .borrow()
            .iter()
            .map(|packet| (packet.timestamp, packet.view.data().to_vec()))
            .collect::<Vec<_>>();
        result
    };
    assert!(!whole.is_empty());

    for split in 1..stream.len() {
        let (mut processor, collector) = processor_with_collector(Config::default());
        processor.parse(stream[..split].to_vec()).expect("parse head");
        processor.parse(stream[split..].to_vec()).expect("parse tail");
        processor.notify_end_of_file().expect("end of file");
        let chunked = collector
            .packets
            .borrow()
            .iter()
            .map(|packet| (packet.timestamp, packet.view.data().to_vec()))
            .collect::<Vec<_>>();
        assert_eq!(chunked, whole, "split at {split}");
    }
}

#[test]
fn force_full_sort_releases_everything_at_end_of_file() {
    let stream = TraceBuilder::new()
        .packet(PacketBuilder::new().sequence_id(1).timestamp(300).payload(EVENT_FIELD, b"a"))
        .packet(flush_packet(1_000))
        .packet(PacketBuilder::new().sequence_id(1).timestamp(100).payload(EVENT_FIELD, b"b"))
        .packet(PacketBuilder::new().sequence_id(1).timestamp(200).payload(EVENT_FIELD, b"c"))
        .build();

    let config = Config { sorting_mode: SortingMode::ForceFullSort, ..Config::default() };
    let (mut processor, collector) = processor_with_collector(config);
    processor.parse(stream).expect("parse stream");
    assert!(collector.packets.borrow().is_empty());

    processor.notify_end_of_file().expect("end of file");
    assert_eq!(collector.released_timestamps(), vec![100, 200, 300]);
}

#[test]
fn compressed_batches_ingest_transparently() {
    let inner = TraceBuilder::new()
        .packet(PacketBuilder::new().sequence_id(1).timestamp(20).payload(EVENT_FIELD, b"b"))
        .packet(PacketBuilder::new().sequence_id(1).timestamp(10).payload(EVENT_FIELD, b"a"))
        .build();

    let stream = TraceBuilder::new()
        .compressed(&inner)
        .packet(PacketBuilder::new().sequence_id(1).timestamp(30).payload(EVENT_FIELD, b"c"))
        .build();

    let (_, collector) = ingest(stream);
    assert_eq!(collector.released_timestamps(), vec![10, 20, 30]);
}

#[test]
fn corrupt_packet_fails_ingestion() {
    let stream = TraceBuilder::new()
        .raw_packet(&[0x80]) // dangling varint continuation byte
        .build();

    let (mut processor, _) = processor_with_collector(Config::default());
    let err = processor.parse(stream).expect_err("corrupt packet");
    assert_eq!(err.kind(), ErrorKind::CorruptInput);
}

#[test]
fn needs_incremental_state_without_sequence_id_is_fatal() {
    let stream = TraceBuilder::new()
        .packet(
            PacketBuilder::new()
                .timestamp(10)
                .needs_incremental_state()
                .payload(EVENT_FIELD, b"a"),
        )
        .build();

    let (mut processor, _) = processor_with_collector(Config::default());
    let err = processor.parse(stream).expect_err("sequence id zero");
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
}

#[test]
fn sequence_scoped_clock_without_sequence_id_is_fatal() {
    let timestamp_case = TraceBuilder::new()
        .packet(
            PacketBuilder::new()
                .timestamp(10)
                .timestamp_clock_id(64)
                .payload(EVENT_FIELD, b"a"),
        )
        .build();
    let (mut processor_a, _) = processor_with_collector(Config::default());
    let err = processor_a.parse(timestamp_case).expect_err("scoped clock, no sequence");
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

    let snapshot_case = TraceBuilder::new()
        .packet(PacketBuilder::new().clock_snapshot(
            &[
                SnapshotClock::absolute(BOOTTIME, 1_000),
                SnapshotClock::absolute(64, 0),
            ],
            None,
        ))
        .build();
    let (mut processor_b, _) = processor_with_collector(Config::default());
    let err = processor_b.parse(snapshot_case).expect_err("scoped snapshot, no sequence");
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
}

#[test]
fn needs_incremental_state_on_invalid_sequence_skips_the_packet() {
    let stream = TraceBuilder::new()
        .packet(
            PacketBuilder::new()
                .sequence_id(3)
                .timestamp(5)
                .needs_incremental_state()
                .payload(EVENT_FIELD, b"skipped"),
        )
        .packet(PacketBuilder::new().sequence_id(3).incremental_state_cleared().timestamp(6))
        .packet(
            PacketBuilder::new()
                .sequence_id(3)
                .timestamp(7)
                .needs_incremental_state()
                .payload(EVENT_FIELD, b"kept"),
        )
        .build();

    let (processor, collector) = ingest(stream);
    assert_eq!(processor.stats().value(IngestStat::TokenizerSkippedPackets), 1);
    let bodies = collector.released_bodies();
    // The clear packet itself is forwarded too; the skipped one is not.
    assert!(bodies.iter().all(|body| !body.ends_with(b"skipped")));
    assert!(bodies.iter().any(|body| body.ends_with(b"kept")));
}

#[test]
fn defaults_supply_the_timestamp_clock() {
    let stream = TraceBuilder::new()
        .packet(PacketBuilder::new().sequence_id(9).clock_snapshot(
            &[
                SnapshotClock::absolute(BOOTTIME, 500_000),
                SnapshotClock::absolute(64, 0),
            ],
            None,
        ))
        .packet(
            PacketBuilder::new()
                .sequence_id(9)
                .incremental_state_cleared()
                .defaults_timestamp_clock_id(64),
        )
        .packet(PacketBuilder::new().sequence_id(9).timestamp(123).payload(EVENT_FIELD, b"a"))
        .build();

    let (_, collector) = ingest(stream);
    assert_eq!(*collector.released_timestamps().last().expect("released"), 500_123);
}

#[test]
fn zero_timestamp_frame_timeline_packets_are_dropped() {
    let stream = TraceBuilder::new()
        .packet(PacketBuilder::new().sequence_id(1).frame_timeline_event())
        .packet(
            PacketBuilder::new()
                .sequence_id(1)
                .timestamp(10)
                .frame_timeline_event(),
        )
        .build();

    let (processor, collector) = ingest(stream);
    assert_eq!(
        processor.stats().value(IngestStat::FrameTimelineEventParserErrors),
        1
    );
    assert_eq!(collector.released_timestamps(), vec![10]);
}

#[test]
fn extension_descriptors_land_in_the_pool() {
    let stream = TraceBuilder::new()
        .packet(PacketBuilder::new().sequence_id(1).extension_descriptor(b"fdset"))
        .build();

    let (processor, collector) = ingest(stream);
    assert!(collector.packets.borrow().is_empty());
    assert_eq!(processor.descriptor_pool().len(), 1);
    assert_eq!(processor.descriptor_pool().extension_sets()[0].data(), b"fdset");
}

#[test]
fn service_events_record_lifecycle_metadata() {
    let stream = TraceBuilder::new()
        .packet(
            PacketBuilder::new()
                .timestamp(1_000)
                .service_event(service_event::TRACING_STARTED),
        )
        .packet(
            PacketBuilder::new()
                .timestamp(1_100)
                .service_event(service_event::ALL_DATA_SOURCES_STARTED),
        )
        .packet(
            PacketBuilder::new()
                .timestamp(9_000)
                .service_event(service_event::TRACING_DISABLED),
        )
        .build();

    let (processor, collector) = ingest(stream);
    let metadata = processor.metadata();
    assert_eq!(metadata.tracing_started_ns, Some(1_000));
    assert_eq!(metadata.all_data_sources_started_ns, Some(1_100));
    assert_eq!(metadata.tracing_disabled_ns, Some(9_000));
    assert_eq!(
        collector.events.borrow().as_slice(),
        &[
            (ServiceEventKind::TracingStarted, 1_000),
            (ServiceEventKind::AllDataSourcesStarted, 1_100),
            (ServiceEventKind::TracingDisabled, 9_000),
        ]
    );
}

struct CountingModule {
    field_id: u32,
    timestamps: Rc<RefCell<Vec<i64>>>,
}

impl ParserModule for CountingModule {
    fn tokenize_packet(
        &mut self,
        _decoder: &tracespool::proto::TracePacketDecoder,
        _view: &TraceBlobView,
        timestamp: i64,
        _generation: &Arc<SequenceGeneration>,
        field_id: u32,
    ) -> ModuleResult {
        if field_id != self.field_id {
            return ModuleResult::Ignored;
        }
        self.timestamps.borrow_mut().push(timestamp);
        ModuleResult::Consumed
    }
}

struct FailingModule;

impl ParserModule for FailingModule {
    fn tokenize_packet(
        &mut self,
        _decoder: &tracespool::proto::TracePacketDecoder,
        _view: &TraceBlobView,
        _timestamp: i64,
        _generation: &Arc<SequenceGeneration>,
        _field_id: u32,
    ) -> ModuleResult {
        ModuleResult::Error("unsupported payload".to_string())
    }
}

#[test]
fn registered_modules_consume_their_packets() {
    let timestamps = Rc::new(RefCell::new(Vec::new()));
    let (mut processor, collector) = processor_with_collector(Config::default());
    processor.register_module(
        &[35],
        Box::new(CountingModule { field_id: 35, timestamps: Rc::clone(&timestamps) }),
    );

    let stream = TraceBuilder::new()
        .packet(PacketBuilder::new().sequence_id(1).timestamp(77).payload(35, b"ftrace"))
        .packet(PacketBuilder::new().sequence_id(1).timestamp(88).payload(EVENT_FIELD, b"event"))
        .build();

    processor.parse(stream).expect("parse stream");
    processor.notify_end_of_file().expect("end of file");

    // Consumed packets bypass the sorter; others still flow through.
    assert_eq!(timestamps.borrow().as_slice(), &[77]);
    assert_eq!(collector.released_timestamps(), vec![88]);
}

#[test]
fn module_errors_fail_ingestion() {
    let (mut processor, _) = processor_with_collector(Config::default());
    processor.register_module(&[35], Box::new(FailingModule));

    let stream = TraceBuilder::new()
        .packet(PacketBuilder::new().sequence_id(1).timestamp(77).payload(35, b"ftrace"))
        .build();

    let err = processor.parse(stream).expect_err("module error");
    assert_eq!(err.kind(), ErrorKind::Module);
}
