//! Stream combinators used by subscriptions.

mod rate_limit;

pub use rate_limit::{RateLimit, RateLimitExt};
