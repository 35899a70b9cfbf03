//! Outbound call governance
//!
//! Two gates sit in front of upstream APIs: a sliding-window limiter for the
//! burst-limited source and a daily budget for the quota-scarce one. Both are
//! in-process only and serialize their mutations behind a single mutex each.

pub mod budget;
pub mod limiter;

pub use budget::{next_reset_boundary, Budget, DailyBudget};
pub use limiter::{LimiterStats, SlidingWindowLimiter};
