//! Venue access layer: rate limiting, the authenticated HTTP client and
//! the EIP-712 order signer.

pub mod error;
pub mod http;
pub mod rate_limit;
pub mod signer;

pub use error::VenueError;
pub use http::{ActivityItem, BookLevel, OrderBook, PostOrderAck, VenueClient};
pub use rate_limit::{AcquireStatus, RateLimiter, BUCKET_CLOB, BUCKET_DATA, BUCKET_GAMMA};
pub use signer::{build_signed_order, verifying_contract, OrderArgs, OrderType};
