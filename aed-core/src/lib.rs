//! aed-core: classification and deduplication core for APRS emergency reports.
//!
//! No async and no I/O beyond config files, only the decision chain. Decoded
//! reports go in, `Classification` outcomes come out. The `aed` binary in
//! `aed-server` feeds it and dispatches the resulting notifications.

pub mod cache;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod filter;
pub mod fingerprint;
pub mod geo;
pub mod types;

// Re-export commonly used types at crate root
pub use cache::{CacheCheck, CacheEntry, ExpiringCache};
pub use classifier::{Classification, ClassifierStats, EventClassifier, SuppressReason};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, Units, WatchConfig};
pub use filter::WatchPolicy;
pub use fingerprint::Fingerprint;
pub use types::*;
