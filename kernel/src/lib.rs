// Auditlog Kernel
//
// Buffering, flush triggering and failure recovery between a message
// bus carrying audit-log events and a storage backend that prefers
// bulk writes.

pub mod alert;
pub mod buffer;
pub mod bus;
pub mod config;
pub mod consumer;
pub mod flush;
pub mod policy;
pub mod record;
pub mod timer;
pub mod writer;
