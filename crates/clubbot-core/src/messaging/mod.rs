//! Outbound messaging abstractions (Telegram today).

pub mod port;
pub mod throttled;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;
