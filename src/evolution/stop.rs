//! External stop requests: interrupts and the sentinel file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Shared handle counting stop requests.
///
/// The first request asks for a graceful stop at the next generation
/// boundary; callers decide what further requests mean.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requests: Arc<AtomicU32>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request and return how many have been made so far.
    pub fn request_stop(&self) -> u32 {
        self.requests.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requests.load(Ordering::SeqCst) > 0
    }

    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

/// Checks the run-level stop sources.
#[derive(Debug, Clone)]
pub struct StopController {
    handle: StopHandle,
    sentinel: Option<PathBuf>,
}

impl StopController {
    pub fn new(sentinel: Option<PathBuf>) -> Self {
        Self {
            handle: StopHandle::new(),
            sentinel,
        }
    }

    pub fn handle(&self) -> StopHandle {
        self.handle.clone()
    }

    pub fn sentinel(&self) -> Option<&Path> {
        self.sentinel.as_deref()
    }

    /// True when an interrupt was received or the sentinel file exists.
    pub fn external_stop_requested(&self) -> bool {
        if self.handle.is_stop_requested() {
            return true;
        }
        if let Some(path) = &self.sentinel
            && path.exists()
        {
            log::info!("Stop file {} found", path.display());
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_counts_requests() {
        let controller = StopController::new(None);
        let handle = controller.handle();
        assert!(!controller.external_stop_requested());
        assert_eq!(handle.request_stop(), 1);
        assert_eq!(handle.request_stop(), 2);
        assert!(controller.external_stop_requested());
    }

    #[test]
    fn test_sentinel_file() {
        let dir = tempfile::tempdir().unwrap();
        let sentinel = dir.path().join("evoloop.stop");
        let controller = StopController::new(Some(sentinel.clone()));
        assert!(!controller.external_stop_requested());
        std::fs::write(&sentinel, b"").unwrap();
        assert!(controller.external_stop_requested());
    }
}
