// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Scoped release of per-request model caches

use std::sync::Arc;
use tracing::trace;

use super::backend::VisionBackend;

/// Calls [`VisionBackend::clear_cache`] when dropped
///
/// Create one at the top of a request; the cache is then released on
/// success, on early `?` returns and on panics alike.
pub struct CacheGuard {
    backend: Arc<dyn VisionBackend>,
}

impl CacheGuard {
    pub fn new(backend: Arc<dyn VisionBackend>) -> Self {
        Self { backend }
    }
}

impl Drop for CacheGuard {
    fn drop(&mut self) {
        self.backend.clear_cache();
        trace!("Model cache released");
    }
}
