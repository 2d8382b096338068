//! Feedback Orchestrator — sequences the local analysis engine and the
//! remote rewrite client and owns the contract between them.

pub mod analysis;
pub mod handlers;
pub mod pipeline;
