//! Packet orchestration: sequence state updates, timestamp resolution,
//! dispatch.
//!
//! The reader sees every packet the tokenizer emits. Clock snapshots go to
//! the clock tracker, interned data and defaults to the sequence registry,
//! service events to the sorter as barriers, and everything else is pushed
//! to the sorter with a resolved trace-time timestamp and the generation
//! handle in effect at that moment.

use thiserror::Error;
use tracing::{error, warn};

use crate::blob::TraceBlobView;
use crate::clock::{
    self, builtin_clock_name, ClockSnapshotRow, ClockValue, BUILTIN_CLOCK_MONOTONIC,
};
use crate::module::ModuleResult;
use crate::processor::IngestContext;
use crate::proto::packet::sequence_flags;
use crate::proto::{
    ClockSnapshotDecoder, ServiceEventDecoder, SnapshotClockDecoder, TraceConfigDecoder,
    TracePacketDecoder,
};
use crate::sorter::ServiceEventKind;
use crate::stats::IngestStat;
use crate::Result;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error(
        "failed to parse trace packet fully ({bytes_left} trailing bytes); \
         the trace is probably corrupt"
    )]
    CorruptPacket { bytes_left: usize },

    #[error("packet needs incremental state but carries no sequence id")]
    NeedsIncrementalStateWithoutSequence,

    #[error("packet timestamp uses sequence-scoped clock {clock_id} but carries no sequence id")]
    SeqScopedClockWithoutSequence { clock_id: u64 },

    #[error("clock snapshot contains sequence-scoped clock {clock_id} but carries no sequence id")]
    SeqScopedSnapshotWithoutSequence { clock_id: u64 },
}

#[derive(Default)]
pub struct TraceReader {
    /// Largest trace-time timestamp resolved so far; undated packets are
    /// pinned to this frontier.
    latest_timestamp: i64,
}

impl TraceReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_packet(&mut self, ctx: &mut IngestContext, view: TraceBlobView) -> Result<()> {
        let decoder = TracePacketDecoder::parse(&view);
        if decoder.bytes_left() > 0 {
            return Err(ReadError::CorruptPacket { bytes_left: decoder.bytes_left() }.into());
        }

        // Compressed batches never reach the reader; the tokenizer inflates
        // them.
        debug_assert!(!decoder.has_compressed_packets());

        let seq_id = decoder.trusted_packet_sequence_id();
        let flags = decoder.sequence_flags();

        if decoder.incremental_state_cleared()
            || flags & sequence_flags::INCREMENTAL_STATE_CLEARED != 0
        {
            self.handle_incremental_state_cleared(ctx, &decoder);
        } else if decoder.previous_packet_dropped() {
            self.handle_previous_packet_dropped(ctx, &decoder);
        }

        // Defaults can affect the timestamp resolution below, so they are
        // parsed before any other field.
        if let Some(defaults) = decoder.trace_packet_defaults() {
            self.parse_trace_packet_defaults(ctx, &decoder, defaults);
        }

        if let Some(interned) = decoder.interned_data() {
            self.parse_interned_data(ctx, &decoder, &interned);
        }

        if let Some(snapshot) = decoder.clock_snapshot() {
            return self.parse_clock_snapshot(ctx, &snapshot, seq_id);
        }

        if let Some(event) = decoder.service_event() {
            let ts = decoder.timestamp().unwrap_or(0) as i64;
            return self.parse_service_event(ctx, ts, &event);
        }

        if let Some(descriptor) = decoder.extension_descriptor() {
            ctx.descriptor_pool.add_from_extension_descriptor(&descriptor);
            return Ok(());
        }

        if flags & sequence_flags::NEEDS_INCREMENTAL_STATE != 0 {
            if seq_id == 0 {
                return Err(ReadError::NeedsIncrementalStateWithoutSequence.into());
            }
            if !ctx.sequences.state_mut(seq_id).is_valid() {
                ctx.stats.increment(IngestStat::TokenizerSkippedPackets);
                return Ok(());
            }
        }

        // Zero-timestamp frame timeline packets are a known producer bug;
        // drop them instead of corrupting the timeline.
        if decoder.has_frame_timeline_event() && decoder.timestamp().unwrap_or(0) == 0 {
            ctx.stats.increment(IngestStat::FrameTimelineEventParserErrors);
            return Ok(());
        }

        let generation = ctx.sequences.state_mut(seq_id).current_generation();

        let timestamp = if let Some(raw) = decoder.timestamp() {
            let mut timestamp = raw as i64;
            let timestamp_clock_id = decoder
                .timestamp_clock_id()
                .or_else(|| generation.defaults().and_then(|d| d.timestamp_clock_id()))
                .unwrap_or(0);

            if (decoder.has_chrome_events() || decoder.has_chrome_metadata())
                && (timestamp_clock_id == 0
                    || u64::from(timestamp_clock_id) == BUILTIN_CLOCK_MONOTONIC)
            {
                // Chrome timestamps are MONOTONIC but often arrive without a
                // clock id, or without any usable snapshot. Best effort: on
                // failure keep the raw value.
                if let Some(trace_ts) =
                    ctx.clock_tracker.to_trace_time(BUILTIN_CLOCK_MONOTONIC, timestamp)
                {
                    timestamp = trace_ts;
                }
            } else if timestamp_clock_id != 0 {
                let mut clock_id = u64::from(timestamp_clock_id);
                if clock::is_sequence_scoped_clock_id(clock_id) {
                    if seq_id == 0 {
                        return Err(ReadError::SeqScopedClockWithoutSequence { clock_id }.into());
                    }
                    clock_id = clock::sequence_scoped_to_global(seq_id, clock_id);
                }
                match ctx.clock_tracker.to_trace_time(clock_id, timestamp) {
                    Some(trace_ts) => timestamp = trace_ts,
                    // The tracker counted the sync failure; dropping one
                    // packet beats aborting the trace.
                    None => return Ok(()),
                }
            }
            timestamp
        } else {
            self.latest_timestamp.max(ctx.sorter.max_timestamp())
        };
        self.latest_timestamp = self.latest_timestamp.max(timestamp);

        if let Some(result) = ctx.modules.dispatch(&decoder, &view, timestamp, &generation) {
            return match result {
                ModuleResult::Consumed | ModuleResult::Ignored => Ok(()),
                ModuleResult::Error(message) => Err(crate::Error::Module { message }),
            };
        }

        if let Some(config) = decoder.trace_config() {
            self.parse_trace_config(&config);
        }

        ctx.sorter.push(timestamp, generation, view);
        Ok(())
    }

    fn handle_incremental_state_cleared(
        &mut self,
        ctx: &mut IngestContext,
        decoder: &TracePacketDecoder,
    ) {
        if !decoder.has_trusted_packet_sequence_id() {
            error!("incremental_state_cleared without trusted_packet_sequence_id");
            ctx.stats.increment(IngestStat::InternedDataTokenizerErrors);
            return;
        }
        let seq_id = decoder.trusted_packet_sequence_id();
        ctx.sequences.state_mut(seq_id).on_incremental_state_cleared();
        // Incremental clocks restart with the state, and modules may cache
        // interned lookups per sequence.
        ctx.clock_tracker.on_incremental_state_cleared(seq_id);
        ctx.modules.on_incremental_state_cleared(seq_id);
    }

    fn handle_previous_packet_dropped(
        &mut self,
        ctx: &mut IngestContext,
        decoder: &TracePacketDecoder,
    ) {
        if !decoder.has_trusted_packet_sequence_id() {
            error!("previous_packet_dropped without trusted_packet_sequence_id");
            ctx.stats.increment(IngestStat::InternedDataTokenizerErrors);
            return;
        }
        ctx.sequences
            .state_mut(decoder.trusted_packet_sequence_id())
            .on_packet_loss();
    }

    fn parse_trace_packet_defaults(
        &mut self,
        ctx: &mut IngestContext,
        decoder: &TracePacketDecoder,
        defaults: TraceBlobView,
    ) {
        if !decoder.has_trusted_packet_sequence_id() {
            error!("trace_packet_defaults without trusted_packet_sequence_id");
            ctx.stats.increment(IngestStat::InternedDataTokenizerErrors);
            return;
        }
        ctx.sequences
            .state_mut(decoder.trusted_packet_sequence_id())
            .update_trace_packet_defaults(defaults);
    }

    fn parse_interned_data(
        &mut self,
        ctx: &mut IngestContext,
        decoder: &TracePacketDecoder,
        interned: &TraceBlobView,
    ) {
        if !decoder.has_trusted_packet_sequence_id() {
            error!("interned_data without trusted_packet_sequence_id");
            ctx.stats.increment(IngestStat::InternedDataTokenizerErrors);
            return;
        }
        let state = ctx.sequences.state_mut(decoder.trusted_packet_sequence_id());

        // Entries interned before the state is valid would land in the wrong
        // generation; skip them until the producer clears.
        if !state.is_valid() {
            ctx.stats.increment(IngestStat::TokenizerSkippedPackets);
            return;
        }

        let mut fields = crate::proto::ProtoDecoder::new(interned.data());
        while let Ok(Some(field)) = fields.read_field() {
            if field.wire_type() != crate::proto::WireType::LenDelimited {
                continue;
            }
            let entry = interned.slice(field.offset(), field.len());
            if let Err(err) = state.intern_message(field.id(), entry) {
                warn!("skipping interned entry: {err}");
                ctx.stats.increment(IngestStat::InternedDataTokenizerErrors);
            }
        }
    }

    fn parse_clock_snapshot(
        &mut self,
        ctx: &mut IngestContext,
        snapshot: &TraceBlobView,
        seq_id: u32,
    ) -> Result<()> {
        let decoded = ClockSnapshotDecoder::parse(snapshot.data());
        if let Some(primary) = decoded.primary_trace_clock {
            ctx.clock_tracker.set_trace_time_clock(primary);
        }

        let mut clocks = Vec::new();
        for raw in decoded.clocks() {
            let clk = SnapshotClockDecoder::parse(raw);
            let mut clock_id = clk.clock_id;
            if clock::is_sequence_scoped_clock_id(clock_id) {
                if seq_id == 0 {
                    return Err(ReadError::SeqScopedSnapshotWithoutSequence { clock_id }.into());
                }
                clock_id = clock::sequence_scoped_to_global(seq_id, clock_id);
            }
            let unit_multiplier_ns =
                if clk.unit_multiplier_ns == 0 { 1 } else { clk.unit_multiplier_ns as i64 };
            clocks.push(ClockValue::new(
                clock_id,
                clk.timestamp as i64,
                unit_multiplier_ns,
                clk.is_incremental,
            ));
        }

        let snapshot_id = ctx.clock_tracker.add_snapshot(&clocks);

        // One diagnostics row per participating clock. An incremental clock
        // maps through a zero delta, which lands on its snapshot baseline.
        for clock_value in &clocks {
            let to_convert = if clock_value.is_incremental { 0 } else { clock_value.value };
            let Some(trace_ts) = ctx.clock_tracker.to_trace_time(clock_value.clock_id, to_convert)
            else {
                continue;
            };
            ctx.clock_snapshot_table.push(ClockSnapshotRow {
                ts: trace_ts,
                clock_id: clock_value.clock_id,
                clock_value: clock_value.value,
                clock_name: builtin_clock_name(clock_value.clock_id),
                snapshot_id,
            });
        }
        Ok(())
    }

    fn parse_service_event(
        &mut self,
        ctx: &mut IngestContext,
        ts: i64,
        event: &TraceBlobView,
    ) -> Result<()> {
        let decoded = ServiceEventDecoder::parse(event.data());
        if decoded.tracing_started {
            ctx.metadata.tracing_started_ns = Some(ts);
            ctx.sorter.notify_service_event(ServiceEventKind::TracingStarted, ts);
        }
        if decoded.all_data_sources_started {
            ctx.metadata.all_data_sources_started_ns = Some(ts);
            ctx.sorter
                .notify_service_event(ServiceEventKind::AllDataSourcesStarted, ts);
        }
        if decoded.all_data_sources_flushed {
            ctx.sorter
                .notify_service_event(ServiceEventKind::AllDataSourcesFlushed, ts);
        }
        if decoded.read_tracing_buffers_completed {
            ctx.sorter
                .notify_service_event(ServiceEventKind::ReadTracingBuffersCompleted, ts);
        }
        if decoded.tracing_disabled {
            ctx.metadata.tracing_disabled_ns = Some(ts);
            ctx.sorter.notify_service_event(ServiceEventKind::TracingDisabled, ts);
        }
        Ok(())
    }

    fn parse_trace_config(&mut self, config: &TraceBlobView) {
        let decoded = TraceConfigDecoder::parse(config.data());
        if decoded.write_into_file && decoded.flush_period_ms == 0 {
            warn!(
                "write_into_file is set without flush_period_ms; the trace will be \
                 buffered fully in memory before sorting"
            );
        }
    }
}
