use crate::dialect::CaseSensitivity;
use crate::error::CacheError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-cache behaviour knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheOptions {
    /// Overrides how names fold. Defaults to the dialect's own rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_sensitivity: Option<CaseSensitivity>,

    /// Remember names a targeted lookup did not find.
    pub negative_lookups: bool,

    /// Issue single-object queries for `get` misses. When false the whole scope
    /// is bulk loaded instead.
    pub targeted_lookups: bool,

    /// Slice, in milliseconds, used while waiting for another caller's load.
    pub lock_wait_ms: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            case_sensitivity: None,
            negative_lookups: true,
            targeted_lookups: true,
            lock_wait_ms: 50,
        }
    }
}

/// Caller-owned cancellation signal shared with in-flight loads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// How a single cache call may behave.
#[derive(Debug, Clone, Default)]
pub struct LoadContext {
    /// Forbid any remote I/O and answer from whatever is cached.
    pub cache_only: bool,
    pub cancel: CancelToken,
}

impl LoadContext {
    pub fn cache_only() -> Self {
        Self {
            cache_only: true,
            ..Self::default()
        }
    }

    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self {
            cache_only: false,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), CacheError> {
        if self.is_cancelled() {
            Err(CacheError::Cancelled)
        } else {
            Ok(())
        }
    }
}
