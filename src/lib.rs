#![forbid(unsafe_code)]

pub mod blob;
pub mod clock;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod module;
pub mod processor;
pub mod proto;
pub mod reader;
pub mod sequence;
pub mod sorter;
pub mod stats;
pub mod tokenizer;

pub use error::{Error, ErrorKind};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the ingestion surface at the crate root for convenience
pub use crate::blob::TraceBlobView;
pub use crate::clock::{
    builtin_clock_name, is_sequence_scoped_clock_id, sequence_scoped_to_global, ClockId,
    ClockSnapshotRow, ClockTracker, ClockValue,
};
pub use crate::config::{Config, DropFtraceDataBefore, SortingMode};
pub use crate::descriptor::DescriptorPool;
pub use crate::module::{ModuleRegistry, ModuleResult, ParserModule};
pub use crate::processor::{TraceMetadata, TraceProcessor};
pub use crate::sequence::{SequenceGeneration, SequenceId, SequenceState, SequenceStateRegistry};
pub use crate::sorter::{PacketSink, ServiceEventKind, SortedPacket, TraceSorter};
pub use crate::stats::{IngestStat, IngestStats};
pub use crate::tokenizer::{TokenizeError, TraceTokenizer};
