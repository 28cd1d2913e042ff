//! Client-facing session gateway for an electronic trading server.
//!
//! The gateway terminates message-oriented connections from trading UIs
//! and automated clients, authenticates them, and brokers traffic between
//! each client and the server's singleton managers: market data, position
//! accounting, order entry, exchange connectivity and algo control.
//!
//! ## Architecture
//!
//! ```text
//! transport (text frames)
//!         ↓
//! Session strand (one mailbox task per connection)
//!         ↓
//! dispatcher → action handlers → manager singletons
//!         ↓                           ↓
//! outbound encoder  ←  1 Hz differential publishers
//! ```
//!
//! ## Concurrency discipline
//!
//! - One strand per session: all session state is mutated by a single
//!   task; only the closed flag is read elsewhere.
//! - The token registry is the only structure written by many sessions
//!   concurrently; it is a lock-free map.
//! - Server-initiated events enter through [`session::SessionHandle`] and
//!   are filtered on-strand (sub-account set, algo ownership, test-token
//!   ownership).

pub mod codec;
pub mod encoder;
pub mod error;
pub mod handlers;
pub mod memory;
pub mod publish;
pub mod services;
pub mod session;
pub mod tokens;
pub mod ws_server;

pub use error::{GatewayError, Result};
pub use services::{Services, ServerState, ShutdownSignal};
pub use session::{Session, SessionCommand, SessionHandle, SessionRegistry};
pub use tokens::{password_digest, TokenRegistry};
pub use ws_server::{create_router, AppState};
