//! Named cross-process reader-writer lock.
//!
//! Processes that share no memory agree on a lock name; the name is hashed to
//! an identifier and a kernel object (System V semaphore set, or a pair of
//! named mutexes on Windows) is created by the first process and attached to
//! by the rest. Shared holds may coexist, an exclusive hold excludes everyone.
//!
//! ```no_run
//! use waflock_core::{LockName, LockOptions, OpenOutcome, Owner, PlatformLock};
//!
//! # fn main() -> waflock_core::Result<()> {
//! let name = LockName::new("/etc/modsecurity/main.conf")?;
//! let (lock, outcome) = PlatformLock::open(name, Some(&Owner::new("www-data")), &LockOptions::default())?;
//! if outcome == OpenOutcome::Created {
//!     let _init = lock.exclusive()?;
//!     // one-time initialization of the shared state
//! }
//! let _read = lock.shared()?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod error;
mod hash;
mod identity;
mod lock;
mod name;
mod rwlock;

#[cfg(unix)]
pub use backend::SysvSemaphoreSet;
#[cfg(windows)]
pub use backend::NamedMutexPair;
pub use backend::{
    Capabilities, CreateParams, LockBackend, LockIdentity, MAX_READER_SLOTS, OpenOutcome,
    PlatformBackend, Slot, SlotSnapshot,
};
pub use error::{ErrorKind, LockError, Principal, Result};
pub use hash::{DEFAULT_HASH_SEED, MAX_ID_RANGE, NameHasher};
pub use identity::Owner;
#[cfg(unix)]
pub use identity::{resolve_group, resolve_user};
pub use lock::{
    DEFAULT_ID_RANGE, HandleState, LockOptions, NamedRwLock, PlatformLock, READER_SLOTS,
};
pub use name::LockName;
pub use rwlock::{ExclusiveGuard, SharedGuard};
