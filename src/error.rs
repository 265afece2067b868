use thiserror::Error;

use crate::config::ConfigError;
use crate::proto::DecodeError;
use crate::reader::ReadError;
use crate::tokenizer::TokenizeError;

/// Coarse failure category, for callers deciding how to react.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// The input bytes are malformed; retrying the same trace cannot help.
    CorruptInput,
    /// The stream violates the tracing protocol contract.
    ProtocolViolation,
    /// Configuration could not be loaded or parsed.
    Config,
    /// A registered parser module rejected a packet.
    Module,
}

/// Crate-level convenience error.
///
/// A thin wrapper over the subsystem errors; every variant is fatal for the
/// ingestion that produced it. Soft data loss never surfaces here, it is
/// counted in the stats table instead.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("parser module failed: {message}")]
    Module { message: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Tokenize(_) | Error::Decode(_) => ErrorKind::CorruptInput,
            Error::Read(ReadError::CorruptPacket { .. }) => ErrorKind::CorruptInput,
            Error::Read(_) => ErrorKind::ProtocolViolation,
            Error::Config(_) => ErrorKind::Config,
            Error::Module { .. } => ErrorKind::Module,
        }
    }
}
