use crate::aead::{self, SealResult, Sealer};
use crate::config::{AeadConfig, Backend, PrefetchConfig};
use crate::entropy::{self, EntropyResult, EntropySource};
use crate::prefetch::PrefetchBuffer;
use crate::workload::{self, Parallelism, Workload};
use log::debug;
use std::fmt;
use std::sync::Arc;

/// An entropy source shared by every prefetch entry point.
pub type SharedSource = Arc<dyn EntropySource>;

/// A single measurement of the sealing harness: one backend with one worker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AeadEntry {
    backend: Backend,
    parallelism: Parallelism,
}

impl AeadEntry {
    /// Create a new entry point.
    pub fn new(backend: Backend, parallelism: Parallelism) -> Self {
        AeadEntry {
            backend,
            parallelism,
        }
    }

    /// The backend sealing the blocks.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// The worker configuration.
    pub fn parallelism(&self) -> Parallelism {
        self.parallelism
    }
}

impl fmt::Display for AeadEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}_{}", self.parallelism, self.backend)
    }
}

/// All entry points of the sealing harness, in the order they are measured: grouped per
/// backend, in configured parallelism order.
pub fn aead_entries(cfg: &AeadConfig) -> Vec<AeadEntry> {
    cfg.backends()
        .iter()
        .flat_map(|&backend| {
            cfg.parallelism()
                .iter()
                .map(move |&parallelism| AeadEntry::new(backend, parallelism))
        })
        .collect()
}

/// The sealing harness: the shared workload, one sealer per configured backend, and the entry
/// points to measure. Sealers are built once here and reused by every iteration.
pub struct AeadSuite {
    workload: Workload,
    sealers: Vec<Box<dyn Sealer>>,
    entries: Vec<AeadEntry>,
}

impl AeadSuite {
    /// Build the sealers for every configured backend. Any construction failure is returned
    /// before a single measurement runs.
    pub fn new(cfg: &AeadConfig) -> SealResult<Self> {
        let sealers = cfg
            .backends()
            .iter()
            .map(|&backend| aead::new(backend, cfg.key()))
            .collect::<SealResult<Vec<_>>>()?;
        debug!("built {} sealers", sealers.len());
        Ok(AeadSuite {
            workload: Workload::from_config(cfg),
            sealers,
            entries: aead_entries(cfg),
        })
    }

    /// The entry points of this suite.
    pub fn entries(&self) -> &[AeadEntry] {
        &self.entries
    }

    /// The sealer for the given backend, if it is part of this suite.
    pub fn sealer(&self, backend: Backend) -> Option<&dyn Sealer> {
        self.sealers
            .iter()
            .find(|sealer| sealer.backend() == backend)
            .map(|sealer| &**sealer)
    }

    /// Plaintext bytes processed by one invocation of any entry point.
    pub fn bytes_per_op(&self) -> u64 {
        self.workload.bytes_per_run()
    }

    /// Invoke an entry point once, returning the amount of blocks sealed.
    ///
    /// # Panics
    ///
    /// Panics if the entry uses a backend which is not part of this suite.
    pub fn run(&self, entry: &AeadEntry) -> SealResult<usize> {
        let sealer = match self.sealer(entry.backend) {
            Some(sealer) => sealer,
            None => panic!("no sealer constructed for backend {}", entry.backend),
        };
        workload::run(sealer, &self.workload, entry.parallelism)
    }
}

/// A single measurement of the prefetch harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchEntry {
    /// Every request reads the entropy source directly.
    Direct,
    /// Requests are served from a prefetch buffer of the given capacity.
    Buffered(usize),
}

impl fmt::Display for PrefetchEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PrefetchEntry::Direct => write!(f, "direct"),
            PrefetchEntry::Buffered(capacity) => write!(f, "prefetch_{}", capacity),
        }
    }
}

/// All entry points of the prefetch harness: the unbuffered baseline first (if enabled), then
/// every configured capacity.
pub fn prefetch_entries(cfg: &PrefetchConfig) -> Vec<PrefetchEntry> {
    let direct = if cfg.direct() {
        Some(PrefetchEntry::Direct)
    } else {
        None
    };
    direct
        .into_iter()
        .chain(cfg.capacities().iter().map(|&c| PrefetchEntry::Buffered(c)))
        .collect()
}

/// Something handing out random strings of a fixed size, either straight from the entropy
/// source or through a prefetch buffer.
pub struct PrefetchTarget {
    entry: PrefetchEntry,
    request_size: usize,
    kind: TargetKind,
}

enum TargetKind {
    Direct(SharedSource),
    Buffered(PrefetchBuffer<SharedSource>),
}

impl PrefetchTarget {
    /// Create the target for an entry point. Every buffered target owns its own, initially
    /// empty, buffer, instead of all capacities sharing one process wide buffer. Bytes left over
    /// from one entry point are never served by the next, so results do not depend on the order
    /// entry points run in.
    pub fn new(entry: PrefetchEntry, request_size: usize, source: SharedSource) -> Self {
        let kind = match entry {
            PrefetchEntry::Direct => TargetKind::Direct(source),
            PrefetchEntry::Buffered(capacity) => {
                TargetKind::Buffered(PrefetchBuffer::new(capacity, source))
            }
        };
        PrefetchTarget {
            entry,
            request_size,
            kind,
        }
    }

    /// The entry point this target implements.
    pub fn entry(&self) -> PrefetchEntry {
        self.entry
    }

    /// Bytes handed out by one invocation.
    pub fn bytes_per_op(&self) -> u64 {
        self.request_size as u64
    }

    /// Get one random string. Panics if the entropy source fails.
    pub fn request(&self) -> Vec<u8> {
        match &self.kind {
            TargetKind::Direct(source) => entropy::fetch(source, self.request_size),
            TargetKind::Buffered(buffer) => buffer.request(self.request_size),
        }
    }
}

/// Build a target for every configured prefetch entry point, all reading from the configured
/// entropy source.
pub fn prefetch_targets(cfg: &PrefetchConfig) -> EntropyResult<Vec<PrefetchTarget>> {
    let source: SharedSource = Arc::from(entropy::new(cfg.source())?);
    Ok(prefetch_entries(cfg)
        .into_iter()
        .map(|entry| PrefetchTarget::new(entry, cfg.request_size(), source.clone()))
        .collect())
}
