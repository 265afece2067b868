//! Ingestion stats counters.
//!
//! One process-wide table mutated by every component through a single
//! incrementing interface. Counter names are part of the external contract.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestStat {
    /// A packet needing incremental state (or carrying interned data)
    /// arrived on a sequence whose state is not valid.
    TokenizerSkippedPackets,
    /// Interned data, defaults, or a state-clear arrived without a
    /// trusted packet sequence id, or an interned entry had no id.
    InternedDataTokenizerErrors,
    /// Zero-timestamp frame-timeline packet dropped (known workaround).
    FrameTimelineEventParserErrors,
    /// The clock tracker could not resolve a conversion to trace time.
    ClockSyncFailure,
}

impl IngestStat {
    pub const ALL: [IngestStat; 4] = [
        IngestStat::TokenizerSkippedPackets,
        IngestStat::InternedDataTokenizerErrors,
        IngestStat::FrameTimelineEventParserErrors,
        IngestStat::ClockSyncFailure,
    ];

    pub fn name(self) -> &'static str {
        match self {
            IngestStat::TokenizerSkippedPackets => "tokenizer_skipped_packets",
            IngestStat::InternedDataTokenizerErrors => "interned_data_tokenizer_errors",
            IngestStat::FrameTimelineEventParserErrors => "frame_timeline_event_parser_errors",
            IngestStat::ClockSyncFailure => "clock_sync_failure",
        }
    }
}

#[derive(Debug, Default)]
pub struct IngestStats {
    tokenizer_skipped_packets: AtomicU64,
    interned_data_tokenizer_errors: AtomicU64,
    frame_timeline_event_parser_errors: AtomicU64,
    clock_sync_failure: AtomicU64,
}

impl IngestStats {
    fn counter(&self, stat: IngestStat) -> &AtomicU64 {
        match stat {
            IngestStat::TokenizerSkippedPackets => &self.tokenizer_skipped_packets,
            IngestStat::InternedDataTokenizerErrors => &self.interned_data_tokenizer_errors,
            IngestStat::FrameTimelineEventParserErrors => {
                &self.frame_timeline_event_parser_errors
            }
            IngestStat::ClockSyncFailure => &self.clock_sync_failure,
        }
    }

    pub fn increment(&self, stat: IngestStat) {
        self.counter(stat).fetch_add(1, Ordering::Relaxed);
    }

    pub fn value(&self, stat: IngestStat) -> u64 {
        self.counter(stat).load(Ordering::Relaxed)
    }

    /// All counters with their contract names, for diagnostics output.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        IngestStat::ALL
            .iter()
            .map(|&stat| (stat.name(), self.value(stat)))
            .collect()
    }
}
