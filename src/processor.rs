//! Top-level ingestion pipeline.

use std::sync::Arc;

use bytes::Bytes;

use crate::blob::TraceBlobView;
use crate::clock::{ClockSnapshotRow, ClockTracker};
use crate::config::Config;
use crate::descriptor::DescriptorPool;
use crate::module::{ModuleRegistry, ParserModule};
use crate::reader::TraceReader;
use crate::sequence::SequenceStateRegistry;
use crate::sorter::{PacketSink, TraceSorter};
use crate::stats::IngestStats;
use crate::tokenizer::TraceTokenizer;
use crate::Result;

/// Service lifecycle timestamps observed in the stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraceMetadata {
    pub tracing_started_ns: Option<i64>,
    pub all_data_sources_started_ns: Option<i64>,
    pub tracing_disabled_ns: Option<i64>,
}

/// Shared ingestion state the reader orchestrates per packet.
pub(crate) struct IngestContext {
    pub(crate) stats: Arc<IngestStats>,
    pub(crate) clock_tracker: ClockTracker,
    pub(crate) sequences: SequenceStateRegistry,
    pub(crate) sorter: TraceSorter,
    pub(crate) modules: ModuleRegistry,
    pub(crate) descriptor_pool: DescriptorPool,
    pub(crate) metadata: TraceMetadata,
    pub(crate) clock_snapshot_table: Vec<ClockSnapshotRow>,
}

/// Streaming trace ingestion.
///
/// Feed chunks with [`parse`](Self::parse) and finish with
/// [`notify_end_of_file`](Self::notify_end_of_file); ordered packets arrive
/// at the sink supplied on construction. The first error returned is fatal
/// for the whole ingestion.
pub struct TraceProcessor {
    tokenizer: TraceTokenizer,
    reader: TraceReader,
    context: IngestContext,
}

impl TraceProcessor {
    pub fn new(config: Config, sink: Box<dyn PacketSink>) -> Self {
        let stats = Arc::new(IngestStats::default());
        Self {
            tokenizer: TraceTokenizer::new(),
            reader: TraceReader::new(),
            context: IngestContext {
                clock_tracker: ClockTracker::new(Arc::clone(&stats)),
                stats,
                sequences: SequenceStateRegistry::new(),
                sorter: TraceSorter::new(config.sorting_mode, sink),
                modules: ModuleRegistry::new(),
                descriptor_pool: DescriptorPool::new(),
                metadata: TraceMetadata::default(),
                clock_snapshot_table: Vec::new(),
            },
        }
    }

    /// Registers a downstream parser module for the given packet field ids.
    pub fn register_module(&mut self, field_ids: &[u32], module: Box<dyn ParserModule>) {
        self.context.modules.register(field_ids, module);
    }

    /// Feeds one chunk of the trace stream. Chunk boundaries are arbitrary.
    pub fn parse(&mut self, data: impl Into<Bytes>) -> Result<()> {
        let chunk = TraceBlobView::new(data.into());
        let reader = &mut self.reader;
        let context = &mut self.context;
        self.tokenizer
            .tokenize(chunk, &mut |view| reader.parse_packet(context, view))
    }

    /// Signals end of input: rejects a mid-packet truncation and releases
    /// everything still buffered in the sorter.
    pub fn notify_end_of_file(&mut self) -> Result<()> {
        self.tokenizer.finish()?;
        self.context.sorter.notify_end_of_file();
        Ok(())
    }

    pub fn stats(&self) -> &IngestStats {
        &self.context.stats
    }

    pub fn metadata(&self) -> &TraceMetadata {
        &self.context.metadata
    }

    /// Diagnostics rows, one per clock per snapshot seen.
    pub fn clock_snapshots(&self) -> &[ClockSnapshotRow] {
        &self.context.clock_snapshot_table
    }

    pub fn descriptor_pool(&self) -> &DescriptorPool {
        &self.context.descriptor_pool
    }
}
