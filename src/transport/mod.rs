//! Native messaging transport layer.
//!
//! This module handles communication between the extension (Rust) and the
//! native selector application over the host's stdio pipes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                           ┌──────────────────┐
//! │  Extension (Rust)│        stdin/stdout       │  Native selector │
//! │                  │◄─────────────────────────►│  application     │
//! │  NativeChannel   │   length-prefixed JSON    │                  │
//! └──────────────────┘                           └──────────────────┘
//! ```
//!
//! # Channel Lifecycle
//!
//! 1. `HostLauncher::launch` - Spawn the host, wrap its pipes
//! 2. `NativeChannel::send` - Push `initialize`, then `update`/`close`
//! 3. `NativeChannel::take_inbound` - Receive host messages and `Closed`
//! 4. `NativeChannel::shutdown` - Close pipes, kill the host after a grace period
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | Framed channel and reader/writer loops |
//! | `host` | Process spawning and guarding |

// ============================================================================
// Submodules
// ============================================================================

/// Framed channel and reader/writer loops.
pub mod channel;

/// Native host process management.
pub mod host;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{ChannelEvent, NativeChannel};
pub use host::{HostLauncher, ProcessGuard, ProcessLauncher};
