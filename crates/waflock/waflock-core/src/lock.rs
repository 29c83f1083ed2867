//! Lock lifecycle: name validation, create-or-attach and teardown.

use crate::backend::{
    Capabilities, CreateParams, LockBackend, LockIdentity, OpenOutcome, PlatformBackend,
    SlotSnapshot,
};
use crate::error::{LockError, Result};
use crate::hash::{DEFAULT_HASH_SEED, MAX_ID_RANGE, NameHasher};
use crate::identity::Owner;
use crate::name::LockName;
use std::num::NonZeroU32;
use tracing::debug;

/// `R`: how many shared holders may coexist.
///
/// An exclusive hold drains exactly this many units from READ; every process
/// attached to a set must use the value it was initialized with.
pub const READER_SLOTS: u16 = 1024;

pub const DEFAULT_ID_RANGE: NonZeroU32 = match NonZeroU32::new(MAX_ID_RANGE) {
    Some(range) => range,
    None => unreachable!(),
};

/// Settings every process sharing a name must agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Size of the identifier space names are hashed into.
    pub id_range: NonZeroU32,
    pub hash_seed: u32,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            id_range: DEFAULT_ID_RANGE,
            hash_seed: DEFAULT_HASH_SEED,
        }
    }
}

impl LockOptions {
    pub fn validate(&self) -> Result<()> {
        if self.id_range.get() > MAX_ID_RANGE {
            return Err(LockError::InvalidArgument("identifier range too large"));
        }
        Ok(())
    }

    pub fn identity(&self, name: LockName) -> LockIdentity {
        let identifier = NameHasher::new(self.hash_seed).hash(name.as_bytes(), self.id_range);
        LockIdentity { name, identifier }
    }
}

/// Whether a handle is backed by a kernel object, and how it got one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Uninitialized,
    Created,
    Attached,
}

/// A process-local handle to a named cross-process reader-writer lock.
///
/// Every handle is an independent value; handles that share a name (or a
/// hash of one) refer to the same kernel object. See
/// [`acquire_shared`](Self::acquire_shared) and
/// [`acquire_exclusive`](Self::acquire_exclusive) for the protocol.
#[derive(Debug)]
pub struct NamedRwLock<B: LockBackend> {
    pub(crate) identity: LockIdentity,
    pub(crate) backend: B,
    state: HandleState,
}

/// The lock type for the current platform.
pub type PlatformLock = NamedRwLock<PlatformBackend>;

impl<B: LockBackend> NamedRwLock<B> {
    /// Creates the named lock or attaches to it if another process already did.
    ///
    /// `owner` is only consulted when this call creates the primitive. On any
    /// error nothing is left behind.
    pub fn open(
        name: LockName,
        owner: Option<&Owner>,
        options: &LockOptions,
    ) -> Result<(Self, OpenOutcome)> {
        options.validate()?;
        let identity = options.identity(name);
        let params = CreateParams {
            owner,
            reader_slots: READER_SLOTS,
        };
        let (backend, outcome) = B::create_or_attach(&identity, params)?;
        debug!(name = %identity.name, identifier = identity.identifier, ?outcome, "lock opened");

        let state = match outcome {
            OpenOutcome::Created => HandleState::Created,
            OpenOutcome::Opened => HandleState::Attached,
        };
        Ok((
            Self {
                identity,
                backend,
                state,
            },
            outcome,
        ))
    }

    /// [`open`](Self::open) for a name handed over as a buffer plus length.
    pub fn open_declared(
        name: &[u8],
        name_len: usize,
        owner: Option<&Owner>,
        options: &LockOptions,
    ) -> Result<(Self, OpenOutcome)> {
        let name = LockName::with_declared_len(name, name_len)?;
        Self::open(name, owner, options)
    }

    /// Releases this process's reference. The kernel object stays.
    pub fn close(&mut self) -> Result<()> {
        let result = self.backend.close();
        self.sync_state();
        result
    }

    fn sync_state(&mut self) {
        if !self.backend.is_open() {
            self.state = HandleState::Uninitialized;
        }
    }

    /// Closes the handle, then removes the kernel object.
    ///
    /// Removal happens only if closing succeeded. Processes blocked on the
    /// lock are woken with an error. On backends without explicit removal the
    /// handle is still closed and `Unsupported` is returned, whatever state
    /// the handle was in.
    pub fn destroy(&mut self) -> Result<()> {
        if !self.backend.capabilities().destroy {
            if let Err(err) = self.backend.close() {
                debug!(name = %self.identity.name, error = %err, "close before destroy failed");
            }
            self.sync_state();
            return Err(LockError::Unsupported("destroying a named lock"));
        }
        self.backend.close()?;
        self.backend.destroy()?;
        self.state = HandleState::Uninitialized;
        Ok(())
    }

    pub fn identity(&self) -> &LockIdentity {
        &self.identity
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    pub fn snapshot(&self) -> Result<SlotSnapshot> {
        self.backend.snapshot()
    }

    /// Direct access to the primitive, for diagnostics.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}
