//! Correlation ids and trace contexts for checkout log lines

use uuid::Uuid;

/// Correlation ID shared by every log line of one checkout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trace context for one phase of a checkout
///
/// `build_checkout` opens the root context; phases such as `assemble` run as
/// children sharing its trace and correlation ids.
#[derive(Debug, Clone)]
pub struct TraceContext {
    trace_id: Uuid,
    correlation_id: CorrelationId,
    operation: &'static str,
}

impl TraceContext {
    pub fn new(operation: &'static str) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            correlation_id: CorrelationId::new(),
            operation,
        }
    }

    pub fn child_span(&self, operation: &'static str) -> Self {
        Self {
            trace_id: self.trace_id,
            correlation_id: self.correlation_id.clone(),
            operation,
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_span_shares_trace() {
        let parent = TraceContext::new("build_checkout");
        let child = parent.child_span("assemble");

        assert_eq!(child.trace_id(), parent.trace_id());
        assert_eq!(child.correlation_id(), parent.correlation_id());
        assert_eq!(child.operation(), "assemble");
        assert_ne!(
            TraceContext::new("build_checkout").trace_id(),
            parent.trace_id()
        );
    }
}
