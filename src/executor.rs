//! Parallel Executor (C8): a generic bounded-concurrency worker pool used by
//! the Sync Engine's fetch and checkout pools.
//!
//! Implemented as one flat rayon iterator rather than nested `par_iter`
//! scopes, per the Sync Engine's flat work-queue guidance (SPEC_FULL.md
//! §4.6) — nesting data-parallel scopes risks a thread-pool deadlock when
//! the outer iterator's workers all block on inner work that never gets a
//! worker.

use rayon::prelude::*;

/// Run `work_fn` over every item in `items` with at most `jobs` concurrent
/// workers, then hand the full result stream to `callback` on the calling
/// thread. `jobs == 1` runs inline with no thread pool at all.
pub fn execute_in_parallel<T, R, F, C, A>(jobs: usize, items: Vec<T>, work_fn: F, callback: C) -> A
where
    T: Send + Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
    C: FnOnce(std::vec::IntoIter<R>) -> A,
{
    if jobs <= 1 {
        let results: Vec<R> = items.iter().map(&work_fn).collect();
        return callback(results.into_iter());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .expect("failed to build worker pool");

    let results: Vec<R> = pool.install(|| items.par_iter().map(&work_fn).collect());
    callback(results.into_iter())
}

/// The OS file-descriptor budget available to concurrent workers. Each
/// worker holds roughly 3 descriptors open (subprocess stdin/stdout/stderr);
/// §4.6 reserves 5 descriptors of headroom for the process's own handles.
#[cfg(unix)]
pub fn clamp_jobs_to_fd_limit(requested: usize) -> usize {
    match nix::sys::resource::getrlimit(nix::sys::resource::Resource::RLIMIT_NOFILE) {
        Ok((soft, _hard)) if soft > 5 => {
            let budget = ((soft - 5) / 3).max(1) as usize;
            requested.min(budget)
        }
        _ => requested,
    }
}

#[cfg(not(unix))]
pub fn clamp_jobs_to_fd_limit(requested: usize) -> usize {
    requested
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_job_runs_inline() {
        let result = execute_in_parallel(1, vec![1, 2, 3], |x| x * 2, |results| results.sum::<i32>());
        assert_eq!(result, 12);
    }

    #[test]
    fn multiple_jobs_produce_same_aggregate() {
        let result = execute_in_parallel(4, vec![1, 2, 3, 4], |x| x * x, |results| results.sum::<i32>());
        assert_eq!(result, 1 + 4 + 9 + 16);
    }
}
