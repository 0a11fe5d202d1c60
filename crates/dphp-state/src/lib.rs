//! Subject locks and state checkout/commit.

#![deny(unsafe_code)]

pub mod checkout;
pub mod error;
pub mod lock;
pub mod watch;

pub use checkout::{object_store_for, orchestration_bucket, Checkout, StateStore, ORCHESTRATION_BUCKET};
pub use error::{LockError, LockResult, StateError, StateResult};
pub use lock::{LockConfig, LockGuard, SubjectLock, LOCK_KEY, LOCK_VALUE};
pub use watch::wait_for_update;
