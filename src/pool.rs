//! CPU topology and the bounded worker pool that runs parallel kernels.
//!
//! One pool is built per engine and reused across calls. Kernels hand it
//! disjoint output bands, so workers never share a writable buffer and no
//! merge step is needed. A panic inside any worker is caught after all
//! workers have joined and surfaces as `GemmError::Worker`.

use crate::error::{GemmError, Result};
use rayon::prelude::*;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// CPU topology information.
#[derive(Debug, Clone)]
pub struct CpuTopology {
    /// Logical CPUs online.
    pub num_cpus: usize,
    /// CPUs this process may run on (affinity mask), in ascending order.
    pub allowed_cpus: Vec<usize>,
}

impl CpuTopology {
    /// Detect online CPUs and the process affinity mask.
    pub fn detect() -> Self {
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        let num_cpus = if online > 0 { online as usize } else { 1 };
        let allowed_cpus = allowed_cpus().unwrap_or_else(|| (0..num_cpus).collect());
        log::debug!(
            "CPU topology: {num_cpus} online, {} allowed",
            allowed_cpus.len(),
        );
        CpuTopology { num_cpus, allowed_cpus }
    }

    /// Worker count to use when the caller asks for "auto" (0).
    pub fn default_threads(&self) -> usize {
        self.allowed_cpus.len().max(1)
    }
}

#[cfg(target_os = "linux")]
fn allowed_cpus() -> Option<Vec<usize>> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
            return None;
        }
        let cpus: Vec<usize> = (0..libc::CPU_SETSIZE as usize)
            .filter(|&cpu| libc::CPU_ISSET(cpu, &set))
            .collect();
        if cpus.is_empty() {
            None
        } else {
            Some(cpus)
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn allowed_cpus() -> Option<Vec<usize>> {
    None
}

/// Pin the current thread to one CPU.
/// Returns true on success.
#[cfg(target_os = "linux")]
pub fn pin_thread_to_cpu(cpu: usize) -> bool {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_thread_to_cpu(_cpu: usize) -> bool {
    false
}

/// Bounded, reusable set of worker threads.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl WorkerPool {
    /// Build a pool with `threads` workers (0 = one per allowed CPU).
    /// With `pin`, worker `i` is pinned to the `i`-th allowed CPU.
    pub fn new(threads: usize, pin: bool) -> Result<Self> {
        let topo = CpuTopology::detect();
        let threads = if threads == 0 { topo.default_threads() } else { threads };

        let mut builder = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("mpgemm-worker{idx}"));
        if pin {
            let cpus = topo.allowed_cpus.clone();
            builder = builder.start_handler(move |idx| {
                let cpu = cpus[idx % cpus.len()];
                if !pin_thread_to_cpu(cpu) {
                    log::warn!("Failed to pin worker {idx} to CPU {cpu}");
                }
            });
        }
        let pool = builder
            .build()
            .map_err(|e| GemmError::Configuration(format!("failed to build worker pool: {e}")))?;

        log::info!("Worker pool: {threads} threads (pinned={pin})");
        Ok(WorkerPool { pool, threads })
    }

    #[inline]
    pub fn num_threads(&self) -> usize {
        self.threads
    }

    /// Run `f` inside the pool and wait for every task it spawns.
    ///
    /// An `Err` from `f` is returned as is; a panic in any worker becomes
    /// `GemmError::Worker`. Either way nothing partial reaches the caller.
    /// Which error a rayon `try_*` combinator inside `f` surfaces is up to
    /// rayon; use [`WorkerPool::for_each_band`] for a deterministic one.
    pub fn run<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> Result<R> + Send,
        R: Send,
    {
        match catch_unwind(AssertUnwindSafe(|| self.pool.install(f))) {
            Ok(result) => result,
            Err(payload) => {
                let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                log::debug!("Worker panicked: {msg}");
                Err(GemmError::Worker(msg))
            }
        }
    }

    /// Run `task(band, chunk)` on consecutive `band_len`-element chunks of
    /// `out`, one task per chunk, and wait for all of them.
    ///
    /// Every band runs to completion. If any fail, the error of the lowest
    /// failing band index is returned, independent of scheduling.
    pub fn for_each_band<T, F>(&self, out: &mut [T], band_len: usize, task: F) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> Result<()> + Send + Sync,
    {
        let band_len = band_len.max(1);
        self.run(|| {
            let results: Vec<Result<()>> = out
                .par_chunks_mut(band_len)
                .enumerate()
                .map(|(band, chunk)| task(band, chunk))
                .collect();
            results.into_iter().collect()
        })
    }

    /// Rows per band when splitting `rows` across the workers.
    pub fn band_rows(&self, rows: usize) -> usize {
        rows.div_ceil(self.threads).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_topology_detection() {
        let topo = CpuTopology::detect();
        eprintln!("CPU topology: {:?}", topo);
        assert!(topo.num_cpus >= 1);
        assert!(!topo.allowed_cpus.is_empty());
        assert!(topo.default_threads() >= 1);
    }

    #[test]
    fn test_pool_size_and_bands() {
        let pool = WorkerPool::new(3, false).unwrap();
        assert_eq!(pool.num_threads(), 3);
        assert_eq!(pool.band_rows(10), 4);
        assert_eq!(pool.band_rows(2), 1);
        assert_eq!(pool.band_rows(0), 1);
    }

    #[test]
    fn test_pool_reused_across_calls() {
        let pool = WorkerPool::new(2, false).unwrap();
        for round in 0..3 {
            let sum = pool
                .run(|| Ok((0..1000u64).into_par_iter().map(|x| x * round).sum::<u64>()))
                .unwrap();
            assert_eq!(sum, 499_500 * round);
        }
    }

    #[test]
    fn test_first_error_is_returned() {
        let pool = WorkerPool::new(4, false).unwrap();
        let result: Result<()> = pool.run(|| {
            (0..64usize).into_par_iter().try_for_each(|i| {
                if i == 17 {
                    Err(GemmError::Precondition(format!("task {i}")))
                } else {
                    Ok(())
                }
            })
        });
        assert!(matches!(result, Err(GemmError::Precondition(msg)) if msg == "task 17"));
    }

    #[test]
    fn test_worker_panic_becomes_error() {
        let pool = WorkerPool::new(2, false).unwrap();
        let result: Result<()> = pool.run(|| {
            (0..8usize).into_par_iter().for_each(|i| {
                if i == 5 {
                    panic!("boom in task {i}");
                }
            });
            Ok(())
        });
        match result {
            Err(GemmError::Worker(msg)) => assert!(msg.contains("boom"), "{msg}"),
            other => panic!("expected worker error, got {other:?}"),
        }
        // Pool survives the panic.
        assert_eq!(pool.run(|| Ok(1 + 1)).unwrap(), 2);
    }

    #[test]
    fn test_pinned_pool_runs() {
        let pool = WorkerPool::new(2, true).unwrap();
        let v: Vec<usize> = pool
            .run(|| Ok((0..4usize).into_par_iter().map(|x| x * 2).collect()))
            .unwrap();
        assert_eq!(v, vec![0, 2, 4, 6]);
    }

    #[test]
    fn test_bands_cover_buffer() {
        let pool = WorkerPool::new(3, false).unwrap();
        let mut out = vec![0usize; 10];
        pool.for_each_band(&mut out, 4, |band, chunk| {
            chunk.fill(band + 1);
            Ok(())
        })
        .unwrap();
        assert_eq!(out, vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3]);
    }

    #[test]
    fn test_lowest_failing_band_is_reported() {
        let pool = WorkerPool::new(4, false).unwrap();
        let mut out = vec![0u32; 64];
        for _ in 0..20 {
            let result = pool.for_each_band(&mut out, 2, |band, _| {
                if band == 3 || band == 17 || band == 30 {
                    Err(GemmError::Precondition(format!("band {band}")))
                } else {
                    Ok(())
                }
            });
            assert!(
                matches!(&result, Err(GemmError::Precondition(msg)) if msg == "band 3"),
                "{result:?}"
            );
        }
    }
}
