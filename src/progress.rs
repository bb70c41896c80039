//! Progress callback for per-file pipeline events.
//!
//! The pipeline reports progress synchronously, from the task that runs it,
//! after each file finishes. The caller decides how to render it: a
//! terminal progress bar, a log line, a field in a web response.
//!
//! Any `Fn(usize, usize)` closure is a callback receiving
//! `(completed, total)`:
//!
//! ```rust
//! use medocr::ProgressCallback;
//!
//! let report = |done: usize, total: usize| eprintln!("{done}/{total} files");
//! report.on_file_complete(1, 3);
//! ```

use crate::output::ExtractionResult;

/// Receives pipeline events. All methods default to no-ops except
/// [`ProgressCallback::on_file_complete`], the one event every caller needs.
pub trait ProgressCallback: Send + Sync {
    /// Called once before the first file is processed.
    fn on_run_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called after each file, in upload order.
    ///
    /// # Arguments
    /// * `completed`: files finished so far, this one included
    /// * `total`: files in the run
    fn on_file_complete(&self, completed: usize, total: usize);

    /// Called right after [`ProgressCallback::on_file_complete`] with the
    /// file's result, for callers that print per-file status.
    fn on_file_result(&self, result: &ExtractionResult) {
        let _ = result;
    }

    /// Called once after every file has been processed.
    ///
    /// # Arguments
    /// * `total_files`: files in the run
    /// * `success_count`: files that yielded text
    fn on_run_complete(&self, total_files: usize, success_count: usize) {
        let _ = (total_files, success_count);
    }
}

impl<F> ProgressCallback for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn on_file_complete(&self, completed: usize, total: usize) {
        self(completed, total)
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ProgressCallback for NoopProgressCallback {
    fn on_file_complete(&self, _completed: usize, _total: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(2);
        cb.on_file_complete(1, 2);
        cb.on_file_result(&ExtractionResult::unsupported("x.txt"));
        cb.on_run_complete(2, 0);
    }

    #[test]
    fn closures_are_callbacks() {
        let seen = Mutex::new(Vec::new());
        let cb = |done: usize, total: usize| seen.lock().unwrap().push((done, total));
        cb.on_run_start(2);
        cb.on_file_complete(1, 2);
        cb.on_file_complete(2, 2);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn dyn_callback_works() {
        let count = AtomicUsize::new(0);
        let closure = |_: usize, _: usize| {
            count.fetch_add(1, Ordering::SeqCst);
        };
        let cb: &dyn ProgressCallback = &closure;
        cb.on_file_complete(1, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
