// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

//! Cooperative cancellation for long matching runs.

use std::sync::atomic::{AtomicBool, Ordering};

/// A flag the driver checks between functions and between scope passes.
/// Cancelling yields a partial result marked incomplete; wall-clock
/// timeouts are the caller's business.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
