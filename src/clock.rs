//! Clock domain graph and trace-time conversion.
//!
//! Every snapshot asserts that the clock values it carries represent the
//! same instant, which adds an edge between each pair of participating
//! clocks. Converting a timestamp walks the graph from its source clock to
//! the trace-time clock, applying per-edge offsets from the snapshot whose
//! source-side value lies nearest to the running value. No interpolation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::stats::{IngestStat, IngestStats};

pub type ClockId = u64;

pub const BUILTIN_CLOCK_REALTIME: ClockId = 1;
pub const BUILTIN_CLOCK_REALTIME_COARSE: ClockId = 2;
pub const BUILTIN_CLOCK_MONOTONIC: ClockId = 3;
pub const BUILTIN_CLOCK_MONOTONIC_COARSE: ClockId = 4;
pub const BUILTIN_CLOCK_MONOTONIC_RAW: ClockId = 5;
pub const BUILTIN_CLOCK_BOOTTIME: ClockId = 6;

/// Local clock ids in `64..128` are scoped to their producer sequence.
const SEQUENCE_SCOPED_MIN: u64 = 64;
const SEQUENCE_SCOPED_END: u64 = 128;

pub fn is_sequence_scoped_clock_id(clock_id: u64) -> bool {
    (SEQUENCE_SCOPED_MIN..SEQUENCE_SCOPED_END).contains(&clock_id)
}

/// Rewrites a sequence-scoped clock id into its global form. Callers must
/// reject a zero sequence id before getting here.
pub fn sequence_scoped_to_global(sequence_id: u32, clock_id: u64) -> ClockId {
    (u64::from(sequence_id) << 32) | clock_id
}

pub fn builtin_clock_name(clock_id: ClockId) -> Option<&'static str> {
    match clock_id {
        BUILTIN_CLOCK_REALTIME => Some("REALTIME"),
        BUILTIN_CLOCK_REALTIME_COARSE => Some("REALTIME_COARSE"),
        BUILTIN_CLOCK_MONOTONIC => Some("MONOTONIC"),
        BUILTIN_CLOCK_MONOTONIC_COARSE => Some("MONOTONIC_COARSE"),
        BUILTIN_CLOCK_MONOTONIC_RAW => Some("MONOTONIC_RAW"),
        BUILTIN_CLOCK_BOOTTIME => Some("BOOTTIME"),
        _ => None,
    }
}

/// One clock tuple from a snapshot, with the sequence-scoped id already
/// rewritten to its global form.
#[derive(Clone, Copy, Debug)]
pub struct ClockValue {
    pub clock_id: ClockId,
    /// Raw wire value: absolute for normal clocks, a delta from the previous
    /// snapshot for incremental ones.
    pub value: i64,
    pub unit_multiplier_ns: i64,
    pub is_incremental: bool,
}

impl ClockValue {
    pub fn new(clock_id: ClockId, value: i64, unit_multiplier_ns: i64, is_incremental: bool) -> Self {
        Self { clock_id, value, unit_multiplier_ns, is_incremental }
    }
}

/// Diagnostics row: one participating clock of one snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClockSnapshotRow {
    pub ts: i64,
    pub clock_id: ClockId,
    pub clock_value: i64,
    pub clock_name: Option<&'static str>,
    pub snapshot_id: u32,
}

#[derive(Debug)]
struct ClockDomain {
    unit_multiplier_ns: i64,
    is_incremental: bool,
    /// Absolute nanosecond value at the most recent snapshot mentioning this
    /// clock; baseline for incremental deltas.
    last_absolute_ns: Option<i64>,
}

#[derive(Clone, Copy, Debug)]
struct EdgeSnapshot {
    snapshot_id: u32,
    lo_ns: i64,
    hi_ns: i64,
}

fn edge_key(a: ClockId, b: ClockId) -> (ClockId, ClockId) {
    if a <= b { (a, b) } else { (b, a) }
}

#[derive(Clone, Debug)]
struct CachedPath {
    epoch: u64,
    hops: Option<Vec<ClockId>>,
}

pub struct ClockTracker {
    stats: Arc<IngestStats>,
    trace_time_clock: ClockId,
    domains: HashMap<ClockId, ClockDomain>,
    neighbors: HashMap<ClockId, Vec<ClockId>>,
    edges: HashMap<(ClockId, ClockId), Vec<EdgeSnapshot>>,
    next_snapshot_id: u32,
    /// Bumped whenever the graph or the target clock changes.
    epoch: u64,
    path_cache: HashMap<ClockId, CachedPath>,
}

impl ClockTracker {
    pub fn new(stats: Arc<IngestStats>) -> Self {
        Self {
            stats,
            trace_time_clock: BUILTIN_CLOCK_BOOTTIME,
            domains: HashMap::new(),
            neighbors: HashMap::new(),
            edges: HashMap::new(),
            next_snapshot_id: 0,
            epoch: 0,
            path_cache: HashMap::new(),
        }
    }

    /// Clock id that defines trace time. BOOTTIME unless the stream says
    /// otherwise.
    pub fn trace_time_clock(&self) -> ClockId {
        self.trace_time_clock
    }

    pub fn set_trace_time_clock(&mut self, clock_id: ClockId) {
        if self.trace_time_clock != clock_id {
            self.trace_time_clock = clock_id;
            self.epoch += 1;
        }
    }

    /// Records one snapshot and returns its id. Snapshot ids increase
    /// monotonically across the trace.
    pub fn add_snapshot(&mut self, clocks: &[ClockValue]) -> u32 {
        let snapshot_id = self.next_snapshot_id;
        self.next_snapshot_id += 1;
        self.epoch += 1;

        let mut absolute = Vec::with_capacity(clocks.len());
        for clock in clocks {
            let domain = self.domains.entry(clock.clock_id).or_insert(ClockDomain {
                unit_multiplier_ns: clock.unit_multiplier_ns,
                is_incremental: clock.is_incremental,
                last_absolute_ns: None,
            });
            domain.unit_multiplier_ns = clock.unit_multiplier_ns;
            domain.is_incremental = clock.is_incremental;

            let scaled = clock.value.saturating_mul(clock.unit_multiplier_ns);
            let abs_ns = if clock.is_incremental {
                domain.last_absolute_ns.unwrap_or(0).saturating_add(scaled)
            } else {
                scaled
            };
            domain.last_absolute_ns = Some(abs_ns);
            absolute.push((clock.clock_id, abs_ns));
        }

        for i in 0..absolute.len() {
            for j in i + 1..absolute.len() {
                let (clock_a, a_ns) = absolute[i];
                let (clock_b, b_ns) = absolute[j];
                if clock_a == clock_b {
                    continue;
                }
                let key = edge_key(clock_a, clock_b);
                let (lo_ns, hi_ns) = if key.0 == clock_a { (a_ns, b_ns) } else { (b_ns, a_ns) };
                let observations = self.edges.entry(key).or_default();
                if observations.is_empty() {
                    self.neighbors.entry(clock_a).or_default().push(clock_b);
                    self.neighbors.entry(clock_b).or_default().push(clock_a);
                }
                observations.push(EdgeSnapshot { snapshot_id, lo_ns, hi_ns });
            }
        }

        snapshot_id
    }

    /// Resets the incremental baselines of `sequence_id`'s scoped clocks.
    /// Called when the sequence clears its incremental state.
    pub fn on_incremental_state_cleared(&mut self, sequence_id: u32) {
        if sequence_id == 0 {
            return;
        }
        for (&clock_id, domain) in self.domains.iter_mut() {
            if domain.is_incremental && clock_id >> 32 == u64::from(sequence_id) {
                domain.last_absolute_ns = None;
            }
        }
    }

    /// Converts a raw timestamp on `clock_id` into the trace-time domain.
    ///
    /// Returns `None` and bumps `clock_sync_failure` when the clock has no
    /// path to the trace clock. Converting a trace-clock timestamp is the
    /// identity, snapshots or not.
    pub fn to_trace_time(&mut self, clock_id: ClockId, value: i64) -> Option<i64> {
        if clock_id == self.trace_time_clock {
            return Some(value);
        }

        let source_ns = match self.domains.get(&clock_id) {
            Some(domain) => {
                let scaled = value.saturating_mul(domain.unit_multiplier_ns.max(1));
                if domain.is_incremental {
                    domain.last_absolute_ns.unwrap_or(0).saturating_add(scaled)
                } else {
                    scaled
                }
            }
            None => {
                self.stats.increment(IngestStat::ClockSyncFailure);
                return None;
            }
        };

        let Some(path) = self.find_path(clock_id) else {
            self.stats.increment(IngestStat::ClockSyncFailure);
            return None;
        };

        let mut current = source_ns;
        for hop in path.windows(2) {
            current = self.convert_edge(hop[0], hop[1], current);
        }
        Some(current)
    }

    /// BFS from `source` to the trace clock, memoized per source clock until
    /// the next snapshot or target change.
    fn find_path(&mut self, source: ClockId) -> Option<Vec<ClockId>> {
        if let Some(cached) = self.path_cache.get(&source) {
            if cached.epoch == self.epoch {
                return cached.hops.clone();
            }
        }

        let hops = self.bfs(source);
        self.path_cache
            .insert(source, CachedPath { epoch: self.epoch, hops: hops.clone() });
        hops
    }

    fn bfs(&self, source: ClockId) -> Option<Vec<ClockId>> {
        let target = self.trace_time_clock;
        let mut predecessor: HashMap<ClockId, ClockId> = HashMap::new();
        let mut queue = VecDeque::from([source]);
        predecessor.insert(source, source);

        while let Some(clock) = queue.pop_front() {
            if clock == target {
                let mut path = vec![clock];
                let mut current = clock;
                while current != source {
                    current = predecessor[&current];
                    path.push(current);
                }
                path.reverse();
                return Some(path);
            }
            let Some(neighbors) = self.neighbors.get(&clock) else {
                continue;
            };
            for &next in neighbors {
                if !predecessor.contains_key(&next) {
                    predecessor.insert(next, clock);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Applies the offset of the snapshot whose `from`-side value is nearest
    /// to `value`. Later snapshots win exact ties.
    fn convert_edge(&self, from: ClockId, to: ClockId, value: i64) -> i64 {
        let key = edge_key(from, to);
        let observations = &self.edges[&key];
        let mut best: Option<(u64, &EdgeSnapshot)> = None;
        for observation in observations {
            let from_ns = if key.0 == from { observation.lo_ns } else { observation.hi_ns };
            let distance = value.abs_diff(from_ns);
            if best.map_or(true, |(best_distance, _)| distance <= best_distance) {
                best = Some((distance, observation));
            }
        }
        let (_, observation) = best.expect("edge on a found path has observations");
        let (from_ns, to_ns) = if key.0 == from {
            (observation.lo_ns, observation.hi_ns)
        } else {
            (observation.hi_ns, observation.lo_ns)
        };
        value.saturating_sub(from_ns).saturating_add(to_ns)
    }
}
