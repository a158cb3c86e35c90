//! Logging utilities.
//!
//! Structured output goes through `tracing`; this module only carries
//! the throttling layer that keeps per-tick warnings from turning into
//! log storms.

pub mod throttle;

pub use throttle::{LogThrottle, MarketThrottles};
