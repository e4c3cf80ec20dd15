//! Copy trading: the wallet watcher that polls tracked addresses and the
//! executor that mirrors their trades.

pub mod executor;
pub mod watcher;

pub use executor::CopyExecutor;
pub use watcher::CopyWatcher;
