//! Per-build context
//!
//! Captures the ledger state a checkout transaction is built against (the
//! recent blockhash used as its recency token) together with the trace
//! context every log line of the build is keyed by.

use crate::observability::TraceContext;
use solana_sdk::hash::Hash;
use std::time::Instant;

/// Context for building one checkout transaction
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Recent blockhash fetched from the ledger
    pub blockhash: Hash,

    /// Trace context for correlating the build's log lines
    pub trace_context: TraceContext,

    started: Instant,
}

impl BuildContext {
    pub fn new(blockhash: Hash, trace_context: TraceContext) -> Self {
        Self {
            blockhash,
            trace_context,
            started: Instant::now(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        self.trace_context.correlation_id().as_str()
    }

    /// Milliseconds since the build started
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}
