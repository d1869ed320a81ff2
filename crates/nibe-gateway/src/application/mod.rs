//! Application layer: the protocol engine and the abstractions it depends on.
//!
//! Nothing here touches a socket or the file system.  The engine talks to the
//! network through the [`engine::Transport`] trait and publishes values
//! through [`sink::UpdateSink`], so both can be replaced by in-memory doubles
//! in tests.
//!
//! # Sub-modules
//!
//! - **`engine`** – `Gateway`: read/write requests with correlation,
//!   timeouts and retries, plus handling of unsolicited broadcasts.
//! - **`pending`** – table of requests waiting for an answer.
//! - **`retry`** – the resend policy.
//! - **`sink`** – where decoded values are delivered.

pub mod engine;
pub mod pending;
pub mod retry;
pub mod sink;

pub use engine::{ConnectionState, EngineSettings, Gateway, GatewayError, Transport};
pub use retry::RetryPolicy;
pub use sink::{Update, UpdateSink};
