use crate::entropy::EntropyError;
use crate::registry::RegistryError;
use nrp_common::CodecError;
use thiserror::Error;

/// Errors that can occur while running the daemon.
#[derive(Error, Debug)]
pub enum NrpdError {
    /// Underlying socket or file I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A packet could not be built or parsed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// The entropy source or sink failed.
    #[error("entropy error: {0}")]
    Entropy(#[from] EntropyError),
    /// The peer registry rejected an operation.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}
