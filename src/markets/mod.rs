//! Market metadata and live market data: the TTL cache, the Gamma API
//! fetcher and the market WebSocket feed.

pub mod cache;
pub mod feed;
pub mod gamma;

pub use cache::MarketCache;
pub use feed::{FeedMessage, MarketFeed, SubscriptionStats};
pub use gamma::{DiscoveredToken, GammaClient, Interval};
