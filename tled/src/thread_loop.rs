//! Fixed size worker pool executing statically partitioned loops.

use std::ops::Range;

use crate::Error;

/// Executes loops over an index range split into contiguous partitions, one per worker thread.
///
/// The pool is created once and reused for every loop. Each call to [`execute`] blocks the
/// calling thread until all partitions are processed.
///
/// [`execute`]: ThreadLoopManager::execute
pub struct ThreadLoopManager {
    pool: rayon::ThreadPool,
    threads_number: usize,
}

impl std::fmt::Debug for ThreadLoopManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadLoopManager")
            .field("threads_number", &self.threads_number)
            .finish()
    }
}

impl ThreadLoopManager {
    /// Create a loop manager with the given number of worker threads.
    pub fn new(threads_number: usize) -> Result<Self, Error> {
        if threads_number == 0 {
            return Err(Error::config("number of threads must be positive"));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads_number)
            .thread_name(|i| format!("tled-worker-{}", i))
            .build()?;
        log::debug!("Created worker pool with {} threads", threads_number);
        Ok(ThreadLoopManager {
            pool,
            threads_number,
        })
    }

    /// Create a loop manager using all available logical cores.
    pub fn with_available_threads() -> Result<Self, Error> {
        Self::new(num_cpus::get().max(1))
    }

    #[inline]
    pub fn threads_number(&self) -> usize {
        self.threads_number
    }

    /// Split `[0, len)` into `threads_number` contiguous ranges.
    ///
    /// The first `len % threads_number` ranges get one extra index. Some ranges are empty when
    /// there are fewer indices than threads.
    pub fn partition(&self, len: usize) -> Vec<Range<usize>> {
        let n = self.threads_number;
        let chunk = len / n;
        let extra = len % n;
        let mut start = 0;
        (0..n)
            .map(|i| {
                let size = chunk + usize::from(i < extra);
                let range = start..start + size;
                start += size;
                range
            })
            .collect()
    }

    /// Run `f(thread_id, range)` for every partition of `[0, len)` on the worker pool and return
    /// the results in partition order.
    ///
    /// Returns only after every partition is done.
    pub fn execute<R, F>(&self, len: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize, Range<usize>) -> R + Sync,
    {
        let ranges = self.partition(len);
        let mut results: Vec<Option<R>> = ranges.iter().map(|_| None).collect();
        let f = &f;
        self.pool.scope(|s| {
            for (thread_id, (slot, range)) in results.iter_mut().zip(ranges).enumerate() {
                s.spawn(move |_| {
                    *slot = Some(f(thread_id, range));
                });
            }
        });
        // The scope joins all spawned tasks, so every slot is filled here.
        results.into_iter().flatten().collect()
    }
}
