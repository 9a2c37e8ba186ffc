use crate::aead::{Nonce, SealResult, Sealer, NONCE_SIZE};
use crate::config::{AeadConfig, ConfigError};
use std::fmt;
use std::hint;
use std::str::FromStr;
use std::thread;

/// Size of a single plaintext block, the page size of the filesystem being tuned.
pub const BLOCK_SIZE: usize = 4096;
/// Size of the associated data bound to every block (file ID and block number).
pub const AD_SIZE: usize = 24;
/// Amount of blocks sealed per measurement iteration.
pub const TOTAL_BLOCKS: usize = 32;

/// The inputs of one measurement iteration. The same nonce, associated data and plaintext are
/// sealed over and over again; the output is dropped.
#[derive(Debug, Clone)]
pub struct Workload {
    nonce: Nonce,
    ad: Vec<u8>,
    plaintext: Vec<u8>,
    total_blocks: usize,
}

impl Workload {
    /// Create a new zero filled workload of `total_blocks` blocks of `block_size` bytes.
    pub fn new(block_size: usize, ad_size: usize, total_blocks: usize) -> Self {
        Workload {
            nonce: [0; NONCE_SIZE],
            ad: vec![0; ad_size],
            plaintext: vec![0; block_size],
            total_blocks,
        }
    }

    /// Create the workload described by the config.
    pub fn from_config(cfg: &AeadConfig) -> Self {
        Self::new(cfg.block_size(), cfg.ad_size(), cfg.total_blocks())
    }

    /// The amount of blocks sealed per iteration.
    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    /// The amount of plaintext bytes sealed per iteration.
    pub fn bytes_per_run(&self) -> u64 {
        (self.plaintext.len() * self.total_blocks) as u64
    }
}

impl Default for Workload {
    fn default() -> Self {
        Self::new(BLOCK_SIZE, AD_SIZE, TOTAL_BLOCKS)
    }
}

/// How the blocks of one iteration are spread over threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Parallelism {
    /// Spawn this many fresh worker threads and wait for all of them.
    Threads(usize),
    /// The calling thread seals half of the blocks itself, while a single spawned worker
    /// handles the other half.
    Cooperative,
}

impl Parallelism {
    /// The amount of threads sealing concurrently.
    pub fn workers(&self) -> usize {
        match self {
            Parallelism::Threads(p) => *p,
            Parallelism::Cooperative => 2,
        }
    }
}

impl fmt::Display for Parallelism {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Parallelism::Threads(p) => write!(f, "{}", p),
            Parallelism::Cooperative => write!(f, "2coop"),
        }
    }
}

impl FromStr for Parallelism {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "2coop" {
            return Ok(Parallelism::Cooperative);
        }
        match s.parse::<usize>() {
            Ok(p) if p > 0 => Ok(Parallelism::Threads(p)),
            _ => Err(format!(
                "invalid parallelism {:?}, expected a positive thread count or 2coop",
                s
            )
            .into()),
        }
    }
}

impl TryFrom<String> for Parallelism {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Parallelism> for String {
    fn from(p: Parallelism) -> Self {
        p.to_string()
    }
}

/// Split `total` blocks into `workers` equal shares. `workers` must divide `total`, which is
/// guaranteed by config validation and not checked again here.
pub fn partition(total: usize, workers: usize) -> Vec<usize> {
    vec![total / workers; workers]
}

/// Seal `n` blocks of the workload on the current thread, returning the amount of blocks sealed.
pub fn encrypt_blocks(sealer: &dyn Sealer, workload: &Workload, n: usize) -> SealResult<usize> {
    for _ in 0..n {
        hint::black_box(sealer.seal(&workload.nonce, &workload.ad, &workload.plaintext)?);
    }
    Ok(n)
}

/// Seal all blocks of the workload with `p` freshly spawned threads, and wait for every thread
/// to finish. A panic in a worker is propagated to the caller.
pub fn encrypt_blocks_par(
    sealer: &dyn Sealer,
    workload: &Workload,
    p: usize,
) -> SealResult<usize> {
    thread::scope(|s| {
        let handles: Vec<_> = partition(workload.total_blocks, p)
            .into_iter()
            .map(|share| s.spawn(move || encrypt_blocks(sealer, workload, share)))
            .collect();

        // join every worker before reporting the first error
        let results: Vec<_> = handles.into_iter().map(join).collect();
        results.into_iter().sum()
    })
}

/// Seal all blocks of the workload with the calling thread and 1 spawned thread, each
/// handling half of the blocks.
pub fn encrypt_blocks_coop(sealer: &dyn Sealer, workload: &Workload) -> SealResult<usize> {
    let shares = partition(workload.total_blocks, 2);
    let (inline, spawned) = thread::scope(|s| {
        let worker = s.spawn(|| encrypt_blocks(sealer, workload, shares[1]));
        let inline = encrypt_blocks(sealer, workload, shares[0]);
        (inline, join(worker))
    });
    Ok(inline? + spawned?)
}

/// Run one iteration of the workload with the given parallelism.
pub fn run(
    sealer: &dyn Sealer,
    workload: &Workload,
    parallelism: Parallelism,
) -> SealResult<usize> {
    match parallelism {
        Parallelism::Threads(1) => encrypt_blocks(sealer, workload, workload.total_blocks),
        Parallelism::Threads(p) => encrypt_blocks_par(sealer, workload, p),
        Parallelism::Cooperative => encrypt_blocks_coop(sealer, workload),
    }
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, T>) -> T {
    match handle.join() {
        Ok(v) => v,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
