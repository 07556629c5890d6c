pub mod fetch;
pub mod rate_limiter;

pub use fetch::{FetchPolicy, Fetcher};
pub use rate_limiter::HostRateLimiter;
