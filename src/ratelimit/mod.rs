//! Rate limiting logic and state management.

mod gc;
mod limiter;
mod stats;
mod window;

pub use gc::{Sweeper, WindowGc};
pub use limiter::{Decision, RateLimiter};
pub use stats::{LimiterStats, StatsSnapshot};
pub use window::{compute_window_key, window_index, EventKey, WindowIndex, WindowKey};
