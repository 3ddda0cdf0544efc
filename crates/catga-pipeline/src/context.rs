//! Per-dispatch context threaded through the pipeline (spec §3
//! `Message`, §5 "a cancellation token propagates through mediator ->
//! pipeline -> handler -> transport call").

use catga_core::Metadata;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct DispatchContext {
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub message_type: &'static str,
    pub metadata: Metadata,
    pub cancellation: CancellationToken,
}

impl DispatchContext {
    pub fn new(message_id: impl Into<String>, message_type: &'static str) -> Self {
        Self {
            message_id: message_id.into(),
            correlation_id: None,
            message_type,
            metadata: Metadata::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}
