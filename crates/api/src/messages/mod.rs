//! Message Pipeline
//!
//! Validates, persists and fans out ticket conversation messages, and keeps
//! read receipts in step with the author's live connections.

mod pipeline;

pub use pipeline::{MessagePipeline, SendMessage};
