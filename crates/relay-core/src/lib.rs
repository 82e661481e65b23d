//! Selective rebroadcast engine: selection sessions, the rate limiter in front
//! of them, the destination registry and multi-destination dispatch.

pub mod dispatch;
pub mod error;
pub mod prompt;
pub mod rate_limit;
pub mod registry;
pub mod service;
pub mod session;
pub mod sweeper;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{ErrorKind, RelayError, RelayResult};
pub use service::{ActionOutcome, OriginOutcome, Relay, RelayOptions};
pub use transport::ChatTransport;
