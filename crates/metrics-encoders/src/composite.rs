//! Composite fan-out exporter
//!
//! Sequentially delegates to an ordered list of backends. If one fails
//! terminally, the error is raised immediately and subsequent backends
//! are not attempted — following spec §4.6.5's "short-circuit on first
//! terminal error" rather than the best-effort fan-out other examples in
//! the pack use for unrelated sinks.

use crate::Export;
use async_trait::async_trait;
use metrics_core::MetricSnapshot;
use std::sync::Arc;

/// Wraps several [`Export`] backends behind one handle, delivering to
/// each in registration order and stopping at the first failure.
pub struct CompositeExporter {
    backends: Vec<Arc<dyn Export>>,
}

impl CompositeExporter {
    pub fn new(backends: Vec<Arc<dyn Export>>) -> Self {
        Self { backends }
    }
}

#[async_trait]
impl Export for CompositeExporter {
    async fn export(&self, batch: &[MetricSnapshot]) -> crate::error::Result<()> {
        for backend in &self.backends {
            backend.export(batch).await.map_err(|e| {
                tracing::warn!(backend = backend.name(), error = %e, "composite backend export failed, aborting remaining backends");
                e
            })?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}
