//! Per-sequence incremental state: generations, interned messages, defaults.
//!
//! Every producer sequence owns an independent interning table rebuilt from
//! the stream. Generations snapshot that state: packets handed to the sorter
//! carry an `Arc` to the generation in effect when they were read, so
//! downstream parsers resolve interned ids against a consistent view even
//! after the sequence clears or changes defaults.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::blob::TraceBlobView;
use crate::proto::packet::TracePacketDefaultsDecoder;
use crate::proto::read_interning_id;

pub type SequenceId = u32;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InternError {
    #[error("interned submessage for field {field_id} has no interning id")]
    MissingInterningId { field_id: u32 },
}

/// Map from (message field id, interning id) to the interned submessage
/// bytes. Interning ids are scoped per field id.
#[derive(Debug, Default)]
pub struct InternedMessageTable {
    by_field: HashMap<u32, HashMap<u64, TraceBlobView>>,
}

impl InternedMessageTable {
    fn insert(&mut self, field_id: u32, iid: u64, view: TraceBlobView) {
        self.by_field.entry(field_id).or_default().insert(iid, view);
    }

    fn get(&self, field_id: u32, iid: u64) -> Option<TraceBlobView> {
        self.by_field.get(&field_id)?.get(&iid).cloned()
    }
}

/// Trace-packet-defaults in effect for a generation.
#[derive(Clone, Debug)]
pub struct PacketDefaults {
    view: TraceBlobView,
    timestamp_clock_id: Option<u32>,
}

impl PacketDefaults {
    fn parse(view: TraceBlobView) -> Self {
        let decoded = TracePacketDefaultsDecoder::parse(view.data());
        Self { view, timestamp_clock_id: decoded.timestamp_clock_id }
    }

    pub fn view(&self) -> &TraceBlobView {
        &self.view
    }

    pub fn timestamp_clock_id(&self) -> Option<u32> {
        self.timestamp_clock_id
    }
}

/// One snapshot of a sequence's interning state.
///
/// A defaults change allocates a new generation that shares the interned
/// table with its predecessor; a state clear allocates one with a fresh
/// table. Handles stay alive as long as any pending sorter entry references
/// them.
#[derive(Debug)]
pub struct SequenceGeneration {
    sequence_id: SequenceId,
    index: u64,
    defaults: Option<PacketDefaults>,
    interned: Arc<Mutex<InternedMessageTable>>,
}

impl SequenceGeneration {
    pub fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }

    /// Ordinal of this generation within its sequence, starting at 0.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn defaults(&self) -> Option<&PacketDefaults> {
        self.defaults.as_ref()
    }

    /// Looks up an interned submessage, or `None` if the id was never
    /// interned in this generation.
    pub fn interned_message(&self, field_id: u32, iid: u64) -> Option<TraceBlobView> {
        self.interned.lock().expect("interned table lock poisoned").get(field_id, iid)
    }
}

/// Incremental state of one producer sequence.
#[derive(Debug)]
pub struct SequenceState {
    sequence_id: SequenceId,
    valid: bool,
    generation: Arc<SequenceGeneration>,
    next_generation_index: u64,
}

impl SequenceState {
    fn new(sequence_id: SequenceId) -> Self {
        Self {
            sequence_id,
            valid: false,
            generation: Arc::new(SequenceGeneration {
                sequence_id,
                index: 0,
                defaults: None,
                interned: Arc::new(Mutex::new(InternedMessageTable::default())),
            }),
            next_generation_index: 1,
        }
    }

    pub fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }

    /// False until the first `incremental_state_cleared`, and again after
    /// observed packet loss.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Handle to the generation currently in effect. Identity is stable
    /// until the next state clear or defaults change.
    pub fn current_generation(&self) -> Arc<SequenceGeneration> {
        Arc::clone(&self.generation)
    }

    /// The producer reset its incremental state: mark the sequence valid and
    /// start a fresh generation with an empty interned table and no
    /// defaults.
    pub fn on_incremental_state_cleared(&mut self) {
        self.valid = true;
        self.generation = Arc::new(SequenceGeneration {
            sequence_id: self.sequence_id,
            index: self.next_generation_index,
            defaults: None,
            interned: Arc::new(Mutex::new(InternedMessageTable::default())),
        });
        self.next_generation_index += 1;
    }

    /// Packets were lost on this sequence; interned references can no longer
    /// be trusted until the next clear.
    pub fn on_packet_loss(&mut self) {
        self.valid = false;
    }

    /// Installs new trace-packet-defaults. Unchanged bytes keep the current
    /// generation; otherwise a new generation is allocated that inherits the
    /// interned table by reference, preserving the view of already-emitted
    /// packets.
    pub fn update_trace_packet_defaults(&mut self, view: TraceBlobView) {
        let unchanged = self
            .generation
            .defaults
            .as_ref()
            .is_some_and(|defaults| defaults.view.data() == view.data());
        if unchanged {
            return;
        }
        self.generation = Arc::new(SequenceGeneration {
            sequence_id: self.sequence_id,
            index: self.next_generation_index,
            defaults: Some(PacketDefaults::parse(view)),
            interned: Arc::clone(&self.generation.interned),
        });
        self.next_generation_index += 1;
    }

    /// Inserts an interned submessage into the current generation under the
    /// id carried in its own `iid` field.
    pub fn intern_message(
        &mut self,
        field_id: u32,
        view: TraceBlobView,
    ) -> std::result::Result<(), InternError> {
        let Some(iid) = read_interning_id(view.data()) else {
            return Err(InternError::MissingInterningId { field_id });
        };
        self.generation
            .interned
            .lock()
            .expect("interned table lock poisoned")
            .insert(field_id, iid, view);
        Ok(())
    }
}

/// All known sequences, keyed by `trusted_packet_sequence_id`.
///
/// Sequence id 0 ("not provided") still gets a state; the protocol checks
/// that forbid it live in the reader.
#[derive(Default)]
pub struct SequenceStateRegistry {
    by_sequence: HashMap<SequenceId, SequenceState>,
}

impl SequenceStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_mut(&mut self, sequence_id: SequenceId) -> &mut SequenceState {
        self.by_sequence
            .entry(sequence_id)
            .or_insert_with(|| SequenceState::new(sequence_id))
    }

    pub fn get(&self, sequence_id: SequenceId) -> Option<&SequenceState> {
        self.by_sequence.get(&sequence_id)
    }

    pub fn len(&self) -> usize {
        self.by_sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sequence.is_empty()
    }
}
