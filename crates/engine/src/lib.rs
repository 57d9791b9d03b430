pub mod differential;
pub mod refresh;
pub mod stats;

pub use differential::*;
pub use futarb_core::{classify_expiry, resolve_base_symbol};
pub use refresh::{RefreshFailure, Refresher};
pub use stats::{compute_stats, SnapshotStats};
