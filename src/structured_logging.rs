//! Structured logging for checkout lifecycle events

use crate::observability::CorrelationId;

/// Structured logger for one checkout, keyed by its correlation id
#[derive(Debug, Clone)]
pub struct CheckoutLogger {
    correlation_id: CorrelationId,
}

impl CheckoutLogger {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self { correlation_id }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn log_request(&self, reference: &str, buyer: &str, items: usize) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            reference = %reference,
            buyer = %buyer,
            items = items,
            "Checkout requested"
        );
    }

    pub fn log_priced(&self, total: &str, payable: &str, discounted: bool) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            total = %total,
            payable = %payable,
            discounted = discounted,
            "Order priced"
        );
    }

    pub fn log_setup(&self, created: usize, signature: &str) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            created = created,
            signature = %signature,
            "Created missing token accounts"
        );
    }

    pub fn log_built(&self, reference: &str, base_units: u64, latency_ms: u64) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            reference = %reference,
            base_units = base_units,
            latency_ms = latency_ms,
            "Checkout transaction built"
        );
    }

    pub fn log_failure(&self, category: &str, error: &str, latency_ms: u64) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            category = %category,
            error = %error,
            latency_ms = latency_ms,
            "Checkout failed"
        );
    }
}
