#![deny(missing_docs)]
#![deny(unused_doc_comments)]
#![deny(dead_code)]

//! This crate contains the measurement harnesses used to tune the encryption layer of an
//! encrypting filesystem. It measures AES-GCM sealing throughput for two backends under varying
//! degrees of parallelism, and the cost of reading random bytes through a shared prefetch buffer
//! of varying size.

use aead::SealError;
use config::ConfigError;
use entropy::EntropyError;
use std::fmt;

/// Contains the AEAD sealing interface and the two backend implementations.
pub mod aead;
/// Contains global configuration details.
pub mod config;
/// Access to the system entropy source.
pub mod entropy;
/// Stand-alone timing loop and result reporting.
pub mod measure;
/// A shared buffer amortizing entropy reads over many small requests.
pub mod prefetch;
/// The named measurement entry points of both harnesses.
pub mod suite;
/// Splitting of the sealing work over concurrent workers.
pub mod workload;

/// Global result type for benchmark operations
pub type BenchResult<T> = Result<T, BenchError>;

/// An error originating in the benchmark harness
#[derive(Debug)]
pub struct BenchError {
    kind: BenchErrorKind,
    internal: Box<dyn std::error::Error + Send>,
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "error during {}: {}", self.kind, self.internal)
    }
}

impl std::error::Error for BenchError {
    fn cause(&self) -> Option<&dyn std::error::Error> {
        Some(self.internal.as_ref())
    }
}

impl BenchError {
    /// Create a new BenchError from an IO error with an additional message.
    pub fn new_io(msg: String, e: std::io::Error) -> Self {
        BenchError {
            kind: BenchErrorKind::LocalIo(msg),
            internal: Box::new(e),
        }
    }

    /// Create a new BenchError from any kind, with the underlying error included
    pub fn new(kind: BenchErrorKind, internal: Box<dyn std::error::Error + Send>) -> Self {
        BenchError { kind, internal }
    }

    /// The stage in which the error occurred.
    pub fn kind(&self) -> &BenchErrorKind {
        &self.kind
    }
}

/// Information about where in the harness the error occurred.
#[derive(Debug)]
pub enum BenchErrorKind {
    /// An error while constructing a backend or sealing data.
    Encryption,
    /// An error while setting up the entropy source.
    Entropy,
    /// An error in the configuration.
    Config,
    /// An error while reading or writing local files.
    LocalIo(String),
    /// An error while rendering the results.
    Report,
}

impl fmt::Display for BenchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                BenchErrorKind::Encryption => "encryption".to_string(),
                BenchErrorKind::Entropy => "entropy".to_string(),
                BenchErrorKind::Config => "configuration".to_string(),
                BenchErrorKind::LocalIo(msg) => format!("accessing local storage for {}", msg),
                BenchErrorKind::Report => "reporting".to_string(),
            }
        )
    }
}

impl From<SealError> for BenchError {
    fn from(e: SealError) -> Self {
        BenchError {
            kind: BenchErrorKind::Encryption,
            internal: Box::new(e),
        }
    }
}

impl From<EntropyError> for BenchError {
    fn from(e: EntropyError) -> Self {
        BenchError {
            kind: BenchErrorKind::Entropy,
            internal: Box::new(e),
        }
    }
}

impl From<ConfigError> for BenchError {
    fn from(e: ConfigError) -> Self {
        BenchError {
            kind: BenchErrorKind::Config,
            internal: Box::new(e),
        }
    }
}

impl From<toml::de::Error> for BenchError {
    fn from(e: toml::de::Error) -> Self {
        BenchError {
            kind: BenchErrorKind::Config,
            internal: Box::new(e),
        }
    }
}

impl From<serde_json::Error> for BenchError {
    fn from(e: serde_json::Error) -> Self {
        BenchError {
            kind: BenchErrorKind::Report,
            internal: Box::new(e),
        }
    }
}
