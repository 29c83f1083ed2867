//! Per-OS lock primitives behind one interface.
//!
//! The reader-writer protocol only needs two slots it can atomically
//! decrement (blocking) and increment. Two backends provide them:
//!
//! - [`SysvSemaphoreSet`] (unix): a two-semaphore System V set. Counting,
//!   with `SEM_UNDO` so the kernel reverts a dead process's adjustments.
//! - [`NamedMutexPair`] (windows): two named kernel mutexes. Binary only: it
//!   cannot represent `R` concurrent readers, just "held" or "free". Callers
//!   that care can check [`Capabilities::counting_readers`].

use crate::error::{LockError, Result};
use crate::identity::Owner;
use crate::name::LockName;

#[cfg(unix)]
mod sysv;
#[cfg(windows)]
mod win_mutex;

#[cfg(unix)]
pub use sysv::SysvSemaphoreSet;
#[cfg(windows)]
pub use win_mutex::NamedMutexPair;

/// The backend compiled in for this platform.
#[cfg(unix)]
pub type PlatformBackend = SysvSemaphoreSet;
#[cfg(windows)]
pub type PlatformBackend = NamedMutexPair;

/// Upper bound for the reader slot count (`SEMVMX` on System V).
pub const MAX_READER_SLOTS: u16 = 32_767;

/// One of the two slots of a lock primitive.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Counting semaphore, one unit per free reader slot.
    Read = 0,
    /// Binary gate held briefly by readers and for the whole section by writers.
    Write = 1,
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Read => f.write_str("read"),
            Slot::Write => f.write_str("write"),
        }
    }
}

/// Whether create-or-attach made a new primitive or opened an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Created,
    Opened,
}

/// A lock name together with the identifier derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockIdentity {
    pub name: LockName,
    pub identifier: u32,
}

/// Creation-time parameters. Attachers ignore all of them.
#[derive(Debug, Clone, Copy)]
pub struct CreateParams<'a> {
    pub owner: Option<&'a Owner>,
    pub reader_slots: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `R` shared holders can coexist; otherwise shared access is exclusive too.
    pub counting_readers: bool,
    /// The shared kernel object can be removed explicitly.
    pub destroy: bool,
    /// A holder that dies has its acquisition reverted by the OS.
    pub crash_undo: bool,
    /// Slot values can be read back.
    pub snapshot: bool,
}

/// Current slot values, for status reporting and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub write: i32,
    pub read: i32,
}

pub trait LockBackend: Send + Sync + Sized {
    /// Attempts exclusive creation first and attaches only if the primitive
    /// already exists, so permissions and initial values are set exactly once.
    /// A failed creation leaves nothing behind for other processes to attach to.
    fn create_or_attach(
        identity: &LockIdentity,
        params: CreateParams<'_>,
    ) -> Result<(Self, OpenOutcome)>;

    /// Blocks until `amount` units are available in `slot`, then takes them.
    fn decrement(&self, slot: Slot, amount: i32) -> Result<()>;

    /// Returns `amount` units to `slot`. Does not clamp to capacity.
    fn increment(&self, slot: Slot, amount: i32) -> Result<()>;

    /// Releases this process's reference without touching shared state.
    fn close(&mut self) -> Result<()>;

    /// Whether this handle still refers to a kernel object.
    fn is_open(&self) -> bool;

    /// Removes the shared kernel object.
    fn destroy(&mut self) -> Result<()>;

    fn capabilities(&self) -> Capabilities;

    fn snapshot(&self) -> Result<SlotSnapshot> {
        Err(LockError::Unsupported("reading slot values"))
    }
}

pub(crate) fn check_amount(amount: i32) -> Result<()> {
    if amount < 0 {
        return Err(LockError::InvalidArgument("negative adjustment amount"));
    }
    Ok(())
}
