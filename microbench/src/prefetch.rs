use crate::entropy::{self, EntropySource, OsEntropy};
use log::trace;
use std::sync::{Mutex, PoisonError};

/// A buffer of random bytes shared by all callers. Small requests are served from the buffer,
/// and the buffer is refilled from the entropy source `capacity` bytes at a time, which amortizes
/// the fixed cost of reading the source over many requests.
///
/// All access goes through a single lock. A request holds it for its entire duration, including
/// a refill, so refills never interleave with reads.
pub struct PrefetchBuffer<S = OsEntropy> {
    capacity: usize,
    source: S,
    reservoir: Mutex<Reservoir>,
}

/// Random bytes left over from the last refill.
#[derive(Debug, Default)]
struct Reservoir {
    bytes: Vec<u8>,
    offset: usize,
}

impl Reservoir {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    /// Copy `out.len()` bytes into `out` if that many are available. Nothing is consumed
    /// otherwise.
    fn take(&mut self, out: &mut [u8]) -> bool {
        if self.remaining() < out.len() {
            return false;
        }
        let end = self.offset + out.len();
        out.copy_from_slice(&self.bytes[self.offset..end]);
        self.offset = end;
        true
    }

    /// Replace the contents, dropping whatever was left.
    fn replace(&mut self, bytes: Vec<u8>) {
        self.bytes = bytes;
        self.offset = 0;
    }
}

impl PrefetchBuffer<OsEntropy> {
    /// Create a new buffer of `capacity` bytes backed by the operating system entropy source.
    pub fn with_os_entropy(capacity: usize) -> Self {
        Self::new(capacity, OsEntropy)
    }
}

impl<S: EntropySource> PrefetchBuffer<S> {
    /// Create a new, empty buffer. The first request triggers the first refill.
    pub fn new(capacity: usize, source: S) -> Self {
        PrefetchBuffer {
            capacity,
            source,
            reservoir: Mutex::new(Reservoir::default()),
        }
    }

    /// Amount of bytes fetched from the entropy source on every refill.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Amount of bytes which can be served before the next refill.
    pub fn remaining(&self) -> usize {
        self.lock().remaining()
    }

    /// Get `n` random bytes.
    ///
    /// # Panics
    ///
    /// Panics if the entropy source fails, or if `n` is larger than the capacity of the buffer.
    pub fn request(&self, n: usize) -> Vec<u8> {
        let mut out = vec![0; n];
        self.fill(&mut out);
        out
    }

    /// Fill `out` with random bytes, see [`PrefetchBuffer::request`].
    pub fn fill(&self, out: &mut [u8]) {
        let mut reservoir = self.lock();
        if reservoir.take(out) {
            return;
        }

        trace!(
            "refilling {} byte prefetch buffer, {} bytes discarded",
            self.capacity,
            reservoir.remaining()
        );
        reservoir.replace(entropy::fetch(&self.source, self.capacity));
        if !reservoir.take(out) {
            panic!(
                "prefetch capacity {} can not serve a request of {} bytes",
                self.capacity,
                out.len()
            );
        }
    }

    // a panic while the lock is held leaves the reservoir either untouched or freshly replaced,
    // both of which are valid states
    fn lock(&self) -> std::sync::MutexGuard<'_, Reservoir> {
        self.reservoir.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::PrefetchBuffer;
    use crate::entropy::{EntropyError, EntropyResult, EntropySource};
    use std::collections::HashSet;
    use std::io;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;

    /// Hands out bytes which identify the fill and the position in it, and counts fills.
    #[derive(Default)]
    struct CountingSource {
        fills: AtomicU64,
    }

    impl CountingSource {
        fn fills(&self) -> u64 {
            self.fills.load(Ordering::SeqCst)
        }
    }

    impl EntropySource for CountingSource {
        fn try_fill(&self, buf: &mut [u8]) -> EntropyResult<()> {
            let fill = self.fills.fetch_add(1, Ordering::SeqCst);
            for (i, chunk) in buf.chunks_mut(16).enumerate() {
                let mut tag = [0u8; 16];
                tag[..8].copy_from_slice(&fill.to_le_bytes());
                tag[8..].copy_from_slice(&(i as u64).to_le_bytes());
                let len = chunk.len();
                chunk.copy_from_slice(&tag[..len]);
            }
            Ok(())
        }
    }

    struct Broken;

    impl EntropySource for Broken {
        fn try_fill(&self, _: &mut [u8]) -> EntropyResult<()> {
            Err(EntropyError::Io(io::Error::from(io::ErrorKind::Other)))
        }
    }

    #[test]
    fn starts_empty() {
        let buf = PrefetchBuffer::new(64, CountingSource::default());
        assert_eq!(buf.remaining(), 0);
        assert_eq!(buf.source.fills(), 0);
        assert_eq!(buf.capacity(), 64);
    }

    #[test]
    fn one_refill_per_capacity() {
        let buf = PrefetchBuffer::new(4096, CountingSource::default());

        for _ in 0..256 {
            assert_eq!(buf.request(16).len(), 16);
        }
        assert_eq!(buf.source.fills(), 1);
        assert_eq!(buf.remaining(), 0);

        for batch in 2..=4 {
            for _ in 0..256 {
                buf.request(16);
            }
            assert_eq!(buf.source.fills(), batch);
        }
    }

    #[test]
    fn refills_decrease_with_capacity() {
        let mut last = u64::MAX;
        for capacity in [64, 128, 256, 512, 1024, 2048, 4096, 40960] {
            let buf = PrefetchBuffer::new(capacity, CountingSource::default());
            for _ in 0..1000 {
                buf.request(16);
            }
            let fills = buf.source.fills();
            assert!(fills <= (1000 + capacity as u64 / 16 - 1) / (capacity as u64 / 16));
            assert!(fills <= last);
            last = fills;
        }
    }

    #[test]
    fn stale_tail_discarded() {
        // 40 bytes serve 2 requests of 16, the remaining 8 are dropped on refill
        let buf = PrefetchBuffer::new(40, CountingSource::default());
        buf.request(16);
        buf.request(16);
        assert_eq!(buf.remaining(), 8);
        let third = buf.request(16);
        assert_eq!(buf.source.fills(), 2);
        assert_eq!(&third[..8], &1u64.to_le_bytes());
        assert_eq!(&third[8..], &0u64.to_le_bytes());
        assert_eq!(buf.remaining(), 24);
    }

    #[test]
    fn requests_never_repeat() {
        let buf = PrefetchBuffer::new(256, CountingSource::default());
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(buf.request(16)));
        }
    }

    #[test]
    fn concurrent_requests_never_repeat() {
        let source = Arc::new(CountingSource::default());
        let buf = Arc::new(PrefetchBuffer::new(1024, source.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let buf = buf.clone();
                thread::spawn(move || (0..2000).map(|_| buf.request(16)).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for bytes in handle.join().unwrap() {
                assert_eq!(bytes.len(), 16);
                assert!(seen.insert(bytes), "random string served twice");
            }
        }
        assert_eq!(seen.len(), 8 * 2000);
        // 64 requests per fill, and every fill is consumed completely
        assert_eq!(source.fills(), 8 * 2000 / 64);
    }

    #[test]
    fn os_entropy() {
        let buf = PrefetchBuffer::with_os_entropy(4096);
        assert_ne!(buf.request(16), buf.request(16));
        assert_eq!(buf.remaining(), 4096 - 32);
    }

    #[test]
    #[should_panic(expected = "Failed to read random bytes")]
    fn refill_failure_is_fatal() {
        PrefetchBuffer::new(4096, Broken).request(16);
    }

    #[test]
    #[should_panic(expected = "can not serve")]
    fn capacity_below_request() {
        PrefetchBuffer::new(8, CountingSource::default()).request(16);
    }
}
