//! Bounded-memory windowed sorting of packets by trace time.
//!
//! The tracing service embeds flush barriers in the stream: by the time an
//! `all_data_sources_flushed` event with timestamp T arrives, every sequence
//! has produced everything it will produce at or before T. The sorter
//! exploits this to release packets incrementally instead of buffering the
//! whole trace.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::blob::TraceBlobView;
use crate::config::SortingMode;
use crate::sequence::SequenceGeneration;

/// Service lifecycle markers published alongside sorted packets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceEventKind {
    TracingStarted,
    AllDataSourcesStarted,
    AllDataSourcesFlushed,
    ReadTracingBuffersCompleted,
    TracingDisabled,
}

/// A packet released in trace-time order, with the sequence generation that
/// was in effect when the reader forwarded it.
#[derive(Clone, Debug)]
pub struct SortedPacket {
    pub timestamp: i64,
    pub generation: Arc<SequenceGeneration>,
    pub view: TraceBlobView,
}

/// Downstream consumer of ordered packets and service lifecycle markers.
pub trait PacketSink {
    fn on_packet(&mut self, packet: SortedPacket);

    fn on_service_event(&mut self, kind: ServiceEventKind, timestamp: i64) {
        let _ = (kind, timestamp);
    }
}

impl<F: FnMut(SortedPacket)> PacketSink for F {
    fn on_packet(&mut self, packet: SortedPacket) {
        self(packet)
    }
}

#[derive(Debug)]
struct PendingPacket {
    timestamp: i64,
    /// Insertion order; keeps equal timestamps stable.
    order: u64,
    generation: Arc<SequenceGeneration>,
    view: TraceBlobView,
}

impl PartialEq for PendingPacket {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.order == other.order
    }
}

impl Eq for PendingPacket {}

impl PartialOrd for PendingPacket {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingPacket {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.timestamp, self.order).cmp(&(other.timestamp, other.order))
    }
}

pub struct TraceSorter {
    full_sort: bool,
    pending: BinaryHeap<Reverse<PendingPacket>>,
    next_order: u64,
    max_timestamp: i64,
    sink: Box<dyn PacketSink>,
}

impl TraceSorter {
    /// The deprecated flush-period mode behaves as the default heuristics.
    pub fn new(mode: SortingMode, sink: Box<dyn PacketSink>) -> Self {
        Self {
            full_sort: mode.is_full_sort(),
            pending: BinaryHeap::new(),
            next_order: 0,
            max_timestamp: 0,
            sink,
        }
    }

    /// Largest timestamp ever pushed. The reader pins undated packets to
    /// this frontier.
    pub fn max_timestamp(&self) -> i64 {
        self.max_timestamp
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, timestamp: i64, generation: Arc<SequenceGeneration>, view: TraceBlobView) {
        self.max_timestamp = self.max_timestamp.max(timestamp);
        let order = self.next_order;
        self.next_order += 1;
        self.pending.push(Reverse(PendingPacket { timestamp, order, generation, view }));
    }

    /// Publishes a service event to the sink and, in heuristic mode, applies
    /// flush and read-buffer barriers: every pending entry at or before the
    /// barrier timestamp is released in non-decreasing order.
    pub fn notify_service_event(&mut self, kind: ServiceEventKind, timestamp: i64) {
        self.sink.on_service_event(kind, timestamp);
        if self.full_sort {
            return;
        }
        match kind {
            ServiceEventKind::AllDataSourcesFlushed
            | ServiceEventKind::ReadTracingBuffersCompleted => {
                self.release_up_to(Some(timestamp));
            }
            _ => {}
        }
    }

    /// Releases everything still buffered, in order.
    pub fn notify_end_of_file(&mut self) {
        self.release_up_to(None);
    }

    fn release_up_to(&mut self, limit: Option<i64>) {
        while let Some(Reverse(entry)) = self.pending.peek() {
            if limit.is_some_and(|limit| entry.timestamp > limit) {
                break;
            }
            let Reverse(entry) = self.pending.pop().expect("peeked entry present");
            self.sink.on_packet(SortedPacket {
                timestamp: entry.timestamp,
                generation: entry.generation,
                view: entry.view,
            });
        }
    }
}
