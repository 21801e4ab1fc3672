//! WebSocket connection management, dispatch, and fan-out.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | Per-connection state (pinned identity/role, send channel, liveness) |
//! | `groups` | Role-group fan-out and directed sends (the transport's room primitive) |
//! | `dispatch` | JSON event parsing and routing into the controller |
//! | `session` | Connection lifecycle from upgrade through disconnect cleanup |
//!
//! ## Data flow
//!
//! `session` (read loop) → `dispatch` → `controller` → replies on the
//! sender's channel, fan-out through `groups`.

pub mod connection;
pub mod dispatch;
pub mod groups;
pub mod session;
