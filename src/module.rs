//! Parser module dispatch.
//!
//! Downstream semantic parsers register for the packet field ids they
//! understand. The reader offers each packet to the registered modules in
//! ascending field-id order; the first module that does not ignore it takes
//! it, and the packet bypasses the sorter. A module either consumes the
//! packet or fails ingestion.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::blob::TraceBlobView;
use crate::proto::TracePacketDecoder;
use crate::sequence::SequenceGeneration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleResult {
    /// Not this module's packet; keep offering it.
    Ignored,
    /// The module took the packet.
    Consumed,
    /// The module rejected the packet; fatal for ingestion.
    Error(String),
}

pub trait ParserModule {
    fn tokenize_packet(
        &mut self,
        decoder: &TracePacketDecoder,
        view: &TraceBlobView,
        timestamp: i64,
        generation: &Arc<SequenceGeneration>,
        field_id: u32,
    ) -> ModuleResult;

    /// Invoked when a sequence clears its incremental state.
    fn on_incremental_state_cleared(&mut self, sequence_id: u32) {
        let _ = sequence_id;
    }
}

#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn ParserModule>>,
    by_field: BTreeMap<u32, Vec<usize>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `module` for every field id in `field_ids`.
    pub fn register(&mut self, field_ids: &[u32], module: Box<dyn ParserModule>) {
        let index = self.modules.len();
        self.modules.push(module);
        for &field_id in field_ids {
            self.by_field.entry(field_id).or_default().push(index);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Offers the packet to every module registered on a populated field id,
    /// ascending. Returns `None` if every module ignored it.
    pub fn dispatch(
        &mut self,
        decoder: &TracePacketDecoder,
        view: &TraceBlobView,
        timestamp: i64,
        generation: &Arc<SequenceGeneration>,
    ) -> Option<ModuleResult> {
        for (&field_id, indices) in &self.by_field {
            if !decoder.has_field(field_id) {
                continue;
            }
            for &index in indices {
                let result =
                    self.modules[index].tokenize_packet(decoder, view, timestamp, generation, field_id);
                if result != ModuleResult::Ignored {
                    return Some(result);
                }
            }
        }
        None
    }

    pub fn on_incremental_state_cleared(&mut self, sequence_id: u32) {
        for module in &mut self.modules {
            module.on_incremental_state_cleared(sequence_id);
        }
    }
}
