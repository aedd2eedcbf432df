//! Where served entropy comes from and where received entropy goes.

use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Default device received entropy is mixed into.
pub const DEFAULT_RANDOM_DEVICE: &str = "/dev/urandom";

/// Errors reading or absorbing entropy.
#[derive(Error, Debug)]
pub enum EntropyError {
    /// The operating system RNG failed.
    #[error("entropy source failed: {0}")]
    Source(#[from] rand::Error),
    /// The random device could not be opened.
    #[error("cannot open {path}: {source}")]
    Open {
        /// Device path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Writing to the random device failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fills response payloads with random bytes.
pub trait EntropySource: Send + Sync + fmt::Debug {
    /// Fills all of `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot produce bytes; the caller drops
    /// the message it was building.
    fn fill(&self, buf: &mut [u8]) -> Result<(), EntropyError>;
}

/// The operating system RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), EntropyError> {
        OsRng.try_fill_bytes(buf)?;
        Ok(())
    }
}

/// Consumes entropy received from peers.
pub trait EntropySink: Send + Sync + fmt::Debug {
    /// Absorbs `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes could not be written.
    fn absorb(&self, data: &[u8]) -> Result<(), EntropyError>;
}

/// Writes received entropy into a random device, `/dev/urandom` by default.
///
/// The kernel mixes written bytes into its pool without crediting them, so
/// a hostile peer cannot weaken the pool, only fail to strengthen it.
#[derive(Debug)]
pub struct RandomDevice {
    path: PathBuf,
    file: Mutex<File>,
}

impl RandomDevice {
    /// Opens `path` for writing.
    ///
    /// # Errors
    ///
    /// Returns [`EntropyError::Open`] if the device cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EntropyError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|source| EntropyError::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the device.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EntropySink for RandomDevice {
    fn absorb(&self, data: &[u8]) -> Result<(), EntropyError> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(data)?;
        Ok(())
    }
}
