//! # beacon-broker
//!
//! The broker's domain state, transport-free:
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `presence` | Online producers and consumers, by identity and by connection handle |
//! | `sessions` | At-most-one active monitoring session per producer, activity watermark |
//! | `rate_limit` | Sliding-window per-(client, event kind) counters |
//! | `liveness` | Per-producer heartbeat watermarks and expiry scan |
//!
//! All registries are keyed by identifier, never by live handle graphs, so a
//! disconnect always resolves to a finite set of single-key cleanup
//! operations. Every operation is a linearizable single-key map op; a shared
//! keyspace (e.g. Redis) could replace the in-process maps without touching
//! the connection controller.

#![deny(unsafe_code)]

pub mod liveness;
pub mod presence;
pub mod rate_limit;
pub mod sessions;
