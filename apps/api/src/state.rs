use std::sync::Arc;

use crate::inference::AnalysisEngine;
use crate::rewrite::Rewriter;

/// Shared application state injected into all route handlers via Axum
/// extractors. Both inference components sit behind trait objects so
/// tests substitute doubles and main wires the real backends.
#[derive(Clone)]
pub struct AppState {
    /// Stage 1: local adapter-fine-tuned model. Serializes internally on
    /// its single compute device.
    pub engine: Arc<dyn AnalysisEngine>,
    /// Stage 2: remote rewrite. Stateless; safe to call concurrently.
    pub rewriter: Arc<dyn Rewriter>,
}
