//! Inbound replies: storage records, ingestion and auto-responses.

pub mod ingest;
pub mod model;
pub mod responses;

pub use ingest::ReplyPipeline;
pub use model::{InboundPayload, IngestOutcome, Reply, ReplyKind};
pub use responses::AutoResponder;
