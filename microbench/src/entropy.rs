use crate::config::EntropyConfig;
use log::{debug, error};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

/// Result type for entropy operations
pub type EntropyResult<T> = Result<T, EntropyError>;

/// A source of cryptographically secure random bytes.
pub trait EntropySource: Send + Sync {
    /// Fill `buf` completely with random bytes, or fail without any guarantee about the contents
    /// of `buf`.
    fn try_fill(&self, buf: &mut [u8]) -> EntropyResult<()>;
}

impl<S: EntropySource + ?Sized> EntropySource for Box<S> {
    fn try_fill(&self, buf: &mut [u8]) -> EntropyResult<()> {
        (**self).try_fill(buf)
    }
}

impl<S: EntropySource + ?Sized> EntropySource for Arc<S> {
    fn try_fill(&self, buf: &mut [u8]) -> EntropyResult<()> {
        (**self).try_fill(buf)
    }
}

/// Create the entropy source described by the config.
pub fn new(cfg: &EntropyConfig) -> EntropyResult<Box<dyn EntropySource>> {
    let source: Box<dyn EntropySource> = match cfg {
        EntropyConfig::Os => Box::new(OsEntropy),
        EntropyConfig::Device { path } => Box::new(DeviceEntropy::open(path)?),
    };
    Ok(source)
}

/// Get exactly `n` random bytes from `source`.
///
/// # Panics
///
/// Panics if the source fails. A starved entropy source is an environment fault which makes any
/// measurement meaningless, so there is no error to handle here.
pub fn fetch<S: EntropySource + ?Sized>(source: &S, n: usize) -> Vec<u8> {
    let mut buf = vec![0; n];
    if let Err(e) = source.try_fill(&mut buf) {
        error!("could not read {} random bytes: {}", n, e);
        panic!("Failed to read random bytes: {}", e);
    }
    buf
}

/// Get `n` random bytes from the operating system, or panic.
pub fn rand_bytes(n: usize) -> Vec<u8> {
    fetch(&OsEntropy, n)
}

/// The operating system CSPRNG, through the `getrandom` syscall or `/dev/urandom`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn try_fill(&self, buf: &mut [u8]) -> EntropyResult<()> {
        OsRng.try_fill_bytes(buf).map_err(EntropyError::Os)
    }
}

/// A random device file, opened once and read for every request.
#[derive(Debug)]
pub struct DeviceEntropy {
    file: File,
}

impl DeviceEntropy {
    /// Open the random device at `path`.
    pub fn open(path: &Path) -> EntropyResult<Self> {
        debug!("opening random device {:?}", path);
        let file = File::open(path).map_err(EntropyError::Io)?;
        Ok(DeviceEntropy { file })
    }
}

impl EntropySource for DeviceEntropy {
    fn try_fill(&self, buf: &mut [u8]) -> EntropyResult<()> {
        (&self.file).read_exact(buf).map_err(EntropyError::Io)
    }
}

/// An error while reading random bytes
#[derive(Debug)]
pub enum EntropyError {
    /// The operating system RNG failed.
    Os(rand::Error),
    /// Reading the random device failed.
    Io(io::Error),
}

impl fmt::Display for EntropyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EntropyError::Os(e) => write!(f, "OS entropy source: {}", e),
            EntropyError::Io(e) => write!(f, "random device: {}", e),
        }
    }
}

impl std::error::Error for EntropyError {
    fn cause(&self) -> Option<&dyn std::error::Error> {
        match self {
            EntropyError::Os(e) => Some(e),
            EntropyError::Io(e) => Some(e),
        }
    }
}
