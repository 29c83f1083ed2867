//! System V semaphore set backend.
//!
//! # Layout
//!
//! ```text
//! key = identifier + 1          (identifier 0 would otherwise be IPC_PRIVATE)
//! ┌──────────────────────┬──────────────────────┐
//! │ sem[0] READ          │ sem[1] WRITE         │
//! │ at rest: R           │ at rest: 1           │
//! └──────────────────────┴──────────────────────┘
//! ```
//!
//! Every `semop` carries `SEM_UNDO`: if a process dies while holding units,
//! the kernel applies its accumulated adjustment in reverse on exit. That is
//! the crash-safety guarantee of this backend.
//!
//! The set is not reference counted. It outlives every process that attached
//! to it until someone calls [`LockBackend::destroy`].

use super::{
    Capabilities, CreateParams, LockBackend, LockIdentity, MAX_READER_SLOTS, OpenOutcome, Slot,
    SlotSnapshot, check_amount,
};
use crate::error::{LockError, Result};
use crate::identity::{Owner, resolve_group, resolve_user};
use libc::{c_int, c_short, c_ushort, key_t};
use std::io;
use tracing::{debug, info, warn};

const SEM_COUNT: c_int = 2;
/// Owner and group read/alter, nothing for others.
const SEM_MODE: c_int = 0o660;
/// Exclusive create, then attach; one restart if the set vanishes in between.
const CREATE_ATTEMPTS: usize = 2;

#[derive(Debug)]
pub struct SysvSemaphoreSet {
    key: key_t,
    /// `None` once the set has been removed through this handle.
    sem_id: Option<c_int>,
}

fn key_for(identifier: u32) -> Result<key_t> {
    identifier
        .checked_add(1)
        .and_then(|key| key_t::try_from(key).ok())
        .ok_or(LockError::InvalidArgument(
            "identifier does not fit the System V key space",
        ))
}

impl SysvSemaphoreSet {
    pub fn key(&self) -> key_t {
        self.key
    }

    pub fn sem_id(&self) -> Option<c_int> {
        self.sem_id
    }

    fn live_id(&self) -> Result<c_int> {
        self.sem_id
            .ok_or(LockError::InvalidArgument("lock handle is not initialized"))
    }

    /// Sets owner, mode and initial slot values on a set this process just
    /// created. The caller removes the set if this fails.
    fn initialize(&self, sem_id: c_int, params: CreateParams<'_>) -> Result<()> {
        if let Some(owner) = params.owner {
            self.apply_owner(sem_id, owner)?;
        }
        set_value(sem_id, Slot::Read, c_int::from(params.reader_slots))?;
        set_value(sem_id, Slot::Write, 1)?;
        Ok(())
    }

    fn apply_owner(&self, sem_id: c_int, owner: &Owner) -> Result<()> {
        let uid = resolve_user(&owner.user)?;
        let gid = resolve_group(&owner.group)?;

        // SAFETY: semid_ds is plain old data, filled by IPC_STAT before use.
        let mut ds: libc::semid_ds = unsafe { std::mem::zeroed() };
        if unsafe { libc::semctl(sem_id, 0, libc::IPC_STAT, &mut ds as *mut libc::semid_ds) } == -1
        {
            return Err(LockError::BackendCreate {
                stage: "reading semaphore permissions",
                source: io::Error::last_os_error(),
            });
        }
        ds.sem_perm.uid = uid;
        ds.sem_perm.gid = gid;
        ds.sem_perm.mode = SEM_MODE as _;
        if unsafe { libc::semctl(sem_id, 0, libc::IPC_SET, &mut ds as *mut libc::semid_ds) } == -1 {
            return Err(LockError::BackendCreate {
                stage: "setting semaphore permissions",
                source: io::Error::last_os_error(),
            });
        }
        debug!(key = self.key, uid, gid, "semaphore set ownership applied");
        Ok(())
    }

    fn adjust(&self, slot: Slot, delta: c_short, op: &'static str) -> Result<()> {
        let sem_id = self.live_id()?;
        let mut sop = libc::sembuf {
            sem_num: slot as c_ushort,
            sem_op: delta,
            sem_flg: libc::SEM_UNDO as c_short,
        };
        // A wait interrupted by a signal is reported, not resumed.
        if unsafe { libc::semop(sem_id, &mut sop, 1) } == -1 {
            return Err(LockError::BackendOperation {
                op,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn remove(sem_id: c_int) -> io::Result<()> {
        if unsafe { libc::semctl(sem_id, 0, libc::IPC_RMID) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

fn set_value(sem_id: c_int, slot: Slot, value: c_int) -> Result<()> {
    if unsafe { libc::semctl(sem_id, slot as c_int, libc::SETVAL, value) } == -1 {
        return Err(LockError::BackendCreate {
            stage: "initializing semaphore values",
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn amount_to_delta(amount: i32) -> Result<c_short> {
    check_amount(amount)?;
    c_short::try_from(amount)
        .map_err(|_| LockError::InvalidArgument("adjustment amount exceeds semaphore range"))
}

impl LockBackend for SysvSemaphoreSet {
    fn create_or_attach(
        identity: &LockIdentity,
        params: CreateParams<'_>,
    ) -> Result<(Self, OpenOutcome)> {
        if params.reader_slots == 0 || params.reader_slots > MAX_READER_SLOTS {
            return Err(LockError::InvalidArgument("reader slot count out of range"));
        }
        let key = key_for(identity.identifier)?;
        let mut attach_err = None;

        for _ in 0..CREATE_ATTEMPTS {
            let sem_id =
                unsafe { libc::semget(key, SEM_COUNT, libc::IPC_CREAT | libc::IPC_EXCL | SEM_MODE) };
            if sem_id != -1 {
                let set = Self {
                    key,
                    sem_id: Some(sem_id),
                };
                if let Err(err) = set.initialize(sem_id, params) {
                    if let Err(rm_err) = Self::remove(sem_id) {
                        warn!(key, error = %rm_err, "failed to remove half-initialized semaphore set");
                    }
                    return Err(err);
                }
                debug!(name = %identity.name, key, sem_id, "created semaphore set");
                return Ok((set, OpenOutcome::Created));
            }

            let create_err = io::Error::last_os_error();
            if create_err.raw_os_error() != Some(libc::EEXIST) {
                return Err(LockError::BackendCreate {
                    stage: "semget",
                    source: create_err,
                });
            }

            // Plain attach, never IPC_CREAT: an attacher must not be able to
            // produce a set that nobody initialized.
            let sem_id = unsafe { libc::semget(key, SEM_COUNT, 0) };
            if sem_id != -1 {
                debug!(name = %identity.name, key, sem_id, "attached to semaphore set");
                return Ok((
                    Self {
                        key,
                        sem_id: Some(sem_id),
                    },
                    OpenOutcome::Opened,
                ));
            }

            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(LockError::BackendOpen(err));
            }
            debug!(key, "semaphore set vanished between create and attach");
            attach_err = Some(err);
        }

        Err(LockError::BackendOpen(attach_err.unwrap_or_else(|| {
            io::Error::from_raw_os_error(libc::ENOENT)
        })))
    }

    fn decrement(&self, slot: Slot, amount: i32) -> Result<()> {
        let delta = amount_to_delta(amount)?;
        // semop with zero waits for the value to reach zero; nothing to take.
        if delta == 0 {
            return Ok(());
        }
        self.adjust(slot, -delta, "decrement")
    }

    fn increment(&self, slot: Slot, amount: i32) -> Result<()> {
        let delta = amount_to_delta(amount)?;
        if delta == 0 {
            return Ok(());
        }
        self.adjust(slot, delta, "increment")
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.sem_id.is_some()
    }

    fn destroy(&mut self) -> Result<()> {
        let Some(sem_id) = self.sem_id else {
            return Ok(());
        };
        Self::remove(sem_id).map_err(|source| LockError::BackendOperation {
            op: "destroy",
            source,
        })?;
        self.sem_id = None;
        info!(key = self.key, sem_id, "removed semaphore set");
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            counting_readers: true,
            destroy: true,
            crash_undo: true,
            snapshot: true,
        }
    }

    fn snapshot(&self) -> Result<SlotSnapshot> {
        let sem_id = self.live_id()?;
        let get = |slot: Slot| {
            let value = unsafe { libc::semctl(sem_id, slot as c_int, libc::GETVAL) };
            if value == -1 {
                return Err(LockError::BackendOperation {
                    op: "snapshot",
                    source: io::Error::last_os_error(),
                });
            }
            Ok(value)
        };
        Ok(SlotSnapshot {
            write: get(Slot::Write)?,
            read: get(Slot::Read)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::unique_identity;

    fn params(reader_slots: u16) -> CreateParams<'static> {
        CreateParams {
            owner: None,
            reader_slots,
        }
    }

    #[test]
    fn identifier_zero_avoids_ipc_private() {
        assert_eq!(key_for(0).unwrap(), 1);
        assert_ne!(key_for(0).unwrap(), libc::IPC_PRIVATE);
        assert!(key_for(i32::MAX as u32).is_err());
    }

    #[test]
    fn fresh_set_is_at_rest() {
        let identity = unique_identity("sysv-rest");
        let (mut set, outcome) = SysvSemaphoreSet::create_or_attach(&identity, params(8)).unwrap();
        assert_eq!(outcome, OpenOutcome::Created);
        assert_eq!(set.snapshot().unwrap(), SlotSnapshot { write: 1, read: 8 });
        set.destroy().unwrap();
    }

    #[test]
    fn second_open_attaches() {
        let identity = unique_identity("sysv-attach");
        let (mut first, _) = SysvSemaphoreSet::create_or_attach(&identity, params(4)).unwrap();
        let (second, outcome) = SysvSemaphoreSet::create_or_attach(&identity, params(4)).unwrap();
        assert_eq!(outcome, OpenOutcome::Opened);
        assert_eq!(first.sem_id(), second.sem_id());
        first.destroy().unwrap();
    }

    #[test]
    fn negative_amount_leaves_slots_untouched() {
        let identity = unique_identity("sysv-negative");
        let (mut set, _) = SysvSemaphoreSet::create_or_attach(&identity, params(4)).unwrap();
        let before = set.snapshot().unwrap();

        let err = set.decrement(Slot::Read, -1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = set.increment(Slot::Write, -3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        assert_eq!(set.snapshot().unwrap(), before);
        set.destroy().unwrap();
    }

    #[test]
    fn zero_amount_does_not_wait() {
        let identity = unique_identity("sysv-zero");
        let (mut set, _) = SysvSemaphoreSet::create_or_attach(&identity, params(2)).unwrap();
        set.decrement(Slot::Read, 0).unwrap();
        set.increment(Slot::Read, 0).unwrap();
        assert_eq!(set.snapshot().unwrap(), SlotSnapshot { write: 1, read: 2 });
        set.destroy().unwrap();
    }

    #[test]
    fn reader_slot_bounds_are_checked() {
        let identity = unique_identity("sysv-bounds");
        for slots in [0, MAX_READER_SLOTS + 1] {
            let err = SysvSemaphoreSet::create_or_attach(&identity, params(slots)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn destroyed_handle_rejects_operations() {
        let identity = unique_identity("sysv-destroyed");
        let (mut set, _) = SysvSemaphoreSet::create_or_attach(&identity, params(2)).unwrap();
        set.destroy().unwrap();
        // second destroy through the same handle is a no-op
        set.destroy().unwrap();
        set.close().unwrap();
        set.close().unwrap();

        let err = set.decrement(Slot::Write, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn stale_handle_fails_after_foreign_destroy() {
        let identity = unique_identity("sysv-stale");
        let (mut first, _) = SysvSemaphoreSet::create_or_attach(&identity, params(2)).unwrap();
        let (second, _) = SysvSemaphoreSet::create_or_attach(&identity, params(2)).unwrap();
        first.destroy().unwrap();

        let err = second.decrement(Slot::Write, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendOperationFailure);
    }
}
