//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod reaper;
mod registry;
mod tiers;
mod window;

pub use backend::{Limiter, LimiterPolicy};
pub use bucket::TokenBucket;
pub use reaper::{IdleReaper, ReaperSet};
pub use registry::LimiterRegistry;
pub use tiers::{PolicyTiers, Tier, TierSummary};
pub use window::SlidingWindow;
