//! Progress-callback trait for conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as files are rasterised and sent to the model.
//!
//! # Why callbacks instead of channels?
//!
//! The callback is the least-invasive integration point: a GUI can flip its
//! status banner, the CLI drives a spinner, a test counts calls. The trait is
//! `Send + Sync` because files are processed concurrently.
//!
//! # Example
//!
//! ```rust
//! use doculatex::{ConversionConfig, ConversionProgressCallback};
//! use std::sync::Arc;
//!
//! struct Log;
//!
//! impl ConversionProgressCallback for Log {
//!     fn on_file_rasterized(&self, file: &str, pages: usize) {
//!         eprintln!("{file}: {pages} page(s) ready");
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(Log))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the conversion pipeline. All methods default to no-ops.
///
/// # Thread safety
///
/// With several input files, `on_file_rasterized`, `on_retry` and
/// `on_file_converted` may be called concurrently.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before any file is read.
    fn on_conversion_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a file's page images are ready.
    fn on_file_rasterized(&self, file: &str, pages: usize) {
        let _ = (file, pages);
    }

    /// Called before sleeping between attempts of a remote call.
    ///
    /// # Arguments
    /// * `attempt`      - 1-indexed attempt that just failed
    /// * `max_attempts` - total attempts allowed
    fn on_retry(&self, file: &str, attempt: u32, max_attempts: u32, error: &str) {
        let _ = (file, attempt, max_attempts, error);
    }

    /// Called when a file's reply has been received and normalised.
    fn on_file_converted(&self, file: &str, text_len: usize) {
        let _ = (file, text_len);
    }

    /// Called once with the outcome of the whole batch.
    fn on_conversion_complete(&self, total_files: usize, success: bool) {
        let _ = (total_files, success);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        retries: AtomicUsize,
    }

    impl ConversionProgressCallback for Counting {
        fn on_retry(&self, _file: &str, _attempt: u32, _max: u32, _error: &str) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_accepts_all_events() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_conversion_start(2);
        cb.on_file_rasterized("a.pdf", 3);
        cb.on_retry("a.pdf", 1, 3, "503");
        cb.on_file_converted("a.pdf", 120);
        cb.on_conversion_complete(2, true);
    }

    #[test]
    fn overridden_method_is_called() {
        let cb = Arc::new(Counting {
            retries: AtomicUsize::new(0),
        });
        let dyn_cb: ProgressCallback = cb.clone();
        dyn_cb.on_retry("a.pdf", 1, 3, "503");
        dyn_cb.on_file_converted("a.pdf", 10);
        assert_eq!(cb.retries.load(Ordering::SeqCst), 1);
    }
}
