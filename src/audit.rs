//! Structured security audit trail: buffering, local persistence, batched delivery
//! and reporting.

pub mod export;
pub mod logger;
pub mod sink;
pub mod store;

pub use logger::AuditLogger;
pub use sink::{AuditSink, ConsoleAuditSink, HttpAuditSink};
