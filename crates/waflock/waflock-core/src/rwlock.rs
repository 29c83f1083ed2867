//! Shared/exclusive acquisition over a two-slot lock primitive.
//!
//! # Protocol
//!
//! State is the pair `(WRITE ∈ {0,1}, READ ∈ [0,R])`, at rest `(1, R)`.
//!
//! **Shared:**
//! 1. take WRITE (1)
//! 2. take READ (1), on failure give WRITE back
//! 3. give WRITE back, on failure give READ back
//!
//! **Exclusive:**
//! 1. take WRITE (1)
//! 2. take READ (R), waiting for every shared holder to leave; on failure
//!    give WRITE back
//! 3. keep WRITE until release
//!
//! Releasing exclusive returns READ (R) before WRITE (1), so readers and
//! writers only see the gate reopen once every reader slot is back.
//!
//! The gate is held only for a moment by readers. A steady stream of short
//! shared acquisitions can therefore starve an exclusive waiter; ordering
//! between waiters is whatever the OS primitive provides.
//!
//! On the Windows mutex backend READ is binary, so shared holders exclude one
//! another as well.

use crate::backend::{LockBackend, Slot};
use crate::error::Result;
use crate::lock::{NamedRwLock, READER_SLOTS};
use tracing::{debug, warn};

impl<B: LockBackend> NamedRwLock<B> {
    fn drain_amount(&self) -> i32 {
        i32::from(READER_SLOTS)
    }

    /// Gives units back while unwinding a failed acquisition. A failure here
    /// is logged; the caller reports the error that started the unwind.
    fn roll_back(&self, slot: Slot, amount: i32) {
        if let Err(err) = self.backend.increment(slot, amount) {
            warn!(name = %self.identity.name, %slot, amount, error = %err, "rollback failed");
        }
    }

    /// Blocks until a shared hold is granted.
    pub fn acquire_shared(&self) -> Result<()> {
        self.backend.decrement(Slot::Write, 1)?;
        if let Err(err) = self.backend.decrement(Slot::Read, 1) {
            self.roll_back(Slot::Write, 1);
            return Err(err);
        }
        if let Err(err) = self.backend.increment(Slot::Write, 1) {
            self.roll_back(Slot::Read, 1);
            return Err(err);
        }
        debug!(name = %self.identity.name, "shared lock acquired");
        Ok(())
    }

    /// Gives back one reader slot. Must pair with a successful
    /// [`acquire_shared`](Self::acquire_shared); an unpaired call over-returns
    /// a slot and is not detected.
    pub fn release_shared(&self) -> Result<()> {
        self.backend.increment(Slot::Read, 1)?;
        debug!(name = %self.identity.name, "shared lock released");
        Ok(())
    }

    /// Blocks until every shared holder has left and no other exclusive
    /// holder exists, then keeps the gate closed until release.
    pub fn acquire_exclusive(&self) -> Result<()> {
        self.backend.decrement(Slot::Write, 1)?;
        if let Err(err) = self.backend.decrement(Slot::Read, self.drain_amount()) {
            self.roll_back(Slot::Write, 1);
            return Err(err);
        }
        debug!(name = %self.identity.name, "exclusive lock acquired");
        Ok(())
    }

    pub fn release_exclusive(&self) -> Result<()> {
        self.backend.increment(Slot::Read, self.drain_amount())?;
        self.backend.increment(Slot::Write, 1)?;
        debug!(name = %self.identity.name, "exclusive lock released");
        Ok(())
    }

    /// Acquires a shared hold released when the guard drops.
    pub fn shared(&self) -> Result<SharedGuard<'_, B>> {
        self.acquire_shared()?;
        Ok(SharedGuard {
            lock: self,
            released: false,
        })
    }

    /// Acquires an exclusive hold released when the guard drops.
    pub fn exclusive(&self) -> Result<ExclusiveGuard<'_, B>> {
        self.acquire_exclusive()?;
        Ok(ExclusiveGuard {
            lock: self,
            released: false,
        })
    }
}

/// Shared hold on a [`NamedRwLock`].
///
/// If the process dies while the guard is alive, the OS reverts the hold
/// (semaphore undo on System V, mutex abandonment on Windows).
#[must_use = "the shared lock is released as soon as the guard is dropped"]
pub struct SharedGuard<'a, B: LockBackend> {
    lock: &'a NamedRwLock<B>,
    released: bool,
}

impl<B: LockBackend> SharedGuard<'_, B> {
    /// Releases now and reports the outcome instead of logging it on drop.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.release_shared()
    }
}

impl<B: LockBackend> Drop for SharedGuard<'_, B> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.lock.release_shared() {
            warn!(name = %self.lock.identity.name, error = %err, "failed to release shared lock");
        }
    }
}

/// Exclusive hold on a [`NamedRwLock`].
#[must_use = "the exclusive lock is released as soon as the guard is dropped"]
pub struct ExclusiveGuard<'a, B: LockBackend> {
    lock: &'a NamedRwLock<B>,
    released: bool,
}

impl<B: LockBackend> ExclusiveGuard<'_, B> {
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.release_exclusive()
    }
}

impl<B: LockBackend> Drop for ExclusiveGuard<'_, B> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.lock.release_exclusive() {
            warn!(name = %self.lock.identity.name, error = %err, "failed to release exclusive lock");
        }
    }
}
