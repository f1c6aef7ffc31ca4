//! Security: injection classification and audit logging.

mod audit;
mod injection;

pub use audit::{AuditEvent, AuditSink, MemorySink, Severity, StdoutSink, TracingSink};
pub use injection::{classify, InjectionVerdict};
