//! Row-level mutual exclusion on top of a [`KvStore`][crate::store::KvStore].

mod coordinator;
mod state;

pub use coordinator::LockCoordinator;
pub use coordinator::Locked;
pub use coordinator::ReleaseOutcome;
pub use coordinator::DEFAULT_SETTLE_DELAY;
pub use state::LockState;
