//! Local in-memory emulator of Amazon SQS.
//!
//! Queues live entirely in memory. The engine implements the full message
//! lifecycle: visibility timeouts, receipt handles, dead-letter redrive,
//! FIFO group ordering and deduplication, and the MD5 checksums the AWS
//! SDKs verify on every send. The HTTP layer speaks the form-encoded
//! query protocol and renders XML response envelopes.

pub mod attributes;
pub mod checksum;
pub mod error;
pub mod queue;
pub mod registry;
pub mod server;
pub mod types;
