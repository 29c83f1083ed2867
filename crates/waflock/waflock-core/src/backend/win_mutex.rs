//! Named mutex pair backend for Windows.
//!
//! Two kernel mutexes named `<lock name>_read_lock` and `<lock name>_write_lock`
//! stand in for the two slots. A mutex is binary, so `decrement`/`increment`
//! acquire and release it whatever the amount: the read slot admits one shared
//! holder at a time instead of `R`. Mutex ownership is per thread, so a slot
//! must be released by the thread that took it.
//!
//! The kernel destroys a named mutex when its last handle is closed, so there
//! is no explicit destroy. A mutex whose owner died is reported as abandoned
//! and handed to the next waiter, which gives the crash-safety guarantee.

use super::{
    Capabilities, CreateParams, LockBackend, LockIdentity, OpenOutcome, Slot, check_amount,
};
use crate::error::{LockError, Result};
use std::ffi::CString;
use std::io;
use std::ptr;
use tracing::{debug, warn};
use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_ALREADY_EXISTS, GetLastError, HANDLE, WAIT_ABANDONED, WAIT_OBJECT_0,
};
use windows_sys::Win32::System::Threading::{
    CreateMutexA, INFINITE, ReleaseMutex, WaitForSingleObject,
};

pub const READ_LOCK_SUFFIX: &str = "_read_lock";
pub const WRITE_LOCK_SUFFIX: &str = "_write_lock";

#[derive(Debug)]
struct MutexHandle(HANDLE);

// SAFETY: a kernel handle value may be used from any thread; ownership of the
// mutex itself is tracked by the kernel per thread.
unsafe impl Send for MutexHandle {}
unsafe impl Sync for MutexHandle {}

impl MutexHandle {
    /// Opens or creates the named mutex, reporting whether it already existed.
    fn create(name: &CString) -> io::Result<(Self, bool)> {
        let handle = unsafe { CreateMutexA(ptr::null(), 0, name.as_ptr().cast()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        let existed = unsafe { GetLastError() } == ERROR_ALREADY_EXISTS;
        Ok((Self(handle), existed))
    }

    fn close(&self) -> io::Result<()> {
        if unsafe { CloseHandle(self.0) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct NamedMutexPair {
    name: String,
    read: Option<MutexHandle>,
    write: Option<MutexHandle>,
}

fn mutex_name(identity: &LockIdentity, suffix: &str) -> Result<CString> {
    let mut bytes = identity.name.as_bytes().to_vec();
    bytes.extend_from_slice(suffix.as_bytes());
    CString::new(bytes).map_err(|_| LockError::InvalidArgument("lock name contains a NUL byte"))
}

impl NamedMutexPair {
    fn handle(&self, slot: Slot) -> Result<&MutexHandle> {
        let handle = match slot {
            Slot::Read => self.read.as_ref(),
            Slot::Write => self.write.as_ref(),
        };
        handle.ok_or(LockError::InvalidArgument("lock handle is closed"))
    }

    fn close_slot(slot: &mut Option<MutexHandle>) -> io::Result<()> {
        if let Some(handle) = slot.as_ref() {
            handle.close()?;
            *slot = None;
        }
        Ok(())
    }
}

impl LockBackend for NamedMutexPair {
    fn create_or_attach(
        identity: &LockIdentity,
        _params: CreateParams<'_>,
    ) -> Result<(Self, OpenOutcome)> {
        let read_name = mutex_name(identity, READ_LOCK_SUFFIX)?;
        let write_name = mutex_name(identity, WRITE_LOCK_SUFFIX)?;

        let (read, read_existed) = MutexHandle::create(&read_name).map_err(|source| {
            LockError::BackendCreate {
                stage: "creating read mutex",
                source,
            }
        })?;
        let (write, write_existed) = match MutexHandle::create(&write_name) {
            Ok(created) => created,
            Err(source) => {
                let _ = read.close();
                return Err(LockError::BackendCreate {
                    stage: "creating write mutex",
                    source,
                });
            }
        };

        if read_existed != write_existed {
            let _ = read.close();
            let _ = write.close();
            return Err(LockError::InconsistentState {
                name: identity.name.to_string(),
            });
        }

        let outcome = if read_existed {
            OpenOutcome::Opened
        } else {
            OpenOutcome::Created
        };
        debug!(name = %identity.name, ?outcome, "opened named mutex pair");
        Ok((
            Self {
                name: identity.name.to_string(),
                read: Some(read),
                write: Some(write),
            },
            outcome,
        ))
    }

    fn decrement(&self, slot: Slot, amount: i32) -> Result<()> {
        check_amount(amount)?;
        let handle = self.handle(slot)?;
        match unsafe { WaitForSingleObject(handle.0, INFINITE) } {
            WAIT_OBJECT_0 => Ok(()),
            WAIT_ABANDONED => {
                warn!(name = %self.name, %slot, "acquired mutex abandoned by a dead owner");
                Ok(())
            }
            _ => Err(LockError::BackendOperation {
                op: "decrement",
                source: io::Error::last_os_error(),
            }),
        }
    }

    fn increment(&self, slot: Slot, amount: i32) -> Result<()> {
        check_amount(amount)?;
        let handle = self.handle(slot)?;
        if unsafe { ReleaseMutex(handle.0) } == 0 {
            return Err(LockError::BackendOperation {
                op: "increment",
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.read.is_none() && self.write.is_none() {
            return Err(LockError::InvalidArgument("lock handle is already closed"));
        }
        let read = Self::close_slot(&mut self.read);
        let write = Self::close_slot(&mut self.write);
        read.and(write).map_err(|source| LockError::BackendOperation { op: "close", source })
    }

    fn is_open(&self) -> bool {
        self.read.is_some() || self.write.is_some()
    }

    fn destroy(&mut self) -> Result<()> {
        Err(LockError::Unsupported("destroying a named mutex pair"))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            counting_readers: false,
            destroy: false,
            crash_undo: true,
            snapshot: false,
        }
    }
}

impl Drop for NamedMutexPair {
    fn drop(&mut self) {
        for slot in [&mut self.read, &mut self.write] {
            if let Some(handle) = slot.take() {
                let _ = handle.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::lock::{LockOptions, PlatformLock};
    use crate::name::LockName;
    use crate::test_support::{unique_identity, unique_name};
    use std::sync::mpsc::{self, RecvTimeoutError};
    use std::thread;
    use std::time::Duration;

    fn params() -> CreateParams<'static> {
        CreateParams {
            owner: None,
            reader_slots: 4,
        }
    }

    #[test]
    fn destroy_is_never_supported() {
        let identity = unique_identity("win-destroy");
        let (mut pair, outcome) = NamedMutexPair::create_or_attach(&identity, params()).unwrap();
        assert_eq!(outcome, OpenOutcome::Created);
        assert_eq!(pair.destroy().unwrap_err().kind(), ErrorKind::UnsupportedOperation);
        pair.close().unwrap();
        assert_eq!(pair.destroy().unwrap_err().kind(), ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn second_close_reports_closed_handle() {
        let identity = unique_identity("win-close");
        let (mut pair, _) = NamedMutexPair::create_or_attach(&identity, params()).unwrap();
        pair.close().unwrap();
        assert_eq!(pair.close().unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            pair.decrement(Slot::Write, 1).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn lone_read_mutex_is_inconsistent() {
        let identity = unique_identity("win-half");
        let read_name = mutex_name(&identity, READ_LOCK_SUFFIX).unwrap();
        let (stray, _) = MutexHandle::create(&read_name).unwrap();

        let err = NamedMutexPair::create_or_attach(&identity, params()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InconsistentState);
        stray.close().unwrap();
    }

    #[test]
    fn reports_binary_readers() {
        let identity = unique_identity("win-caps");
        let (pair, _) = NamedMutexPair::create_or_attach(&identity, params()).unwrap();
        assert!(!pair.capabilities().counting_readers);
        assert_eq!(pair.snapshot().unwrap_err().kind(), ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn shared_holders_exclude_each_other() {
        let name = unique_name("win-shared");
        let open = || {
            PlatformLock::open(LockName::new(&name).unwrap(), None, &LockOptions::default())
                .unwrap()
                .0
        };
        let first = open();
        let second = open();
        first.acquire_shared().unwrap();

        let (tx, rx) = mpsc::channel();
        let reader = thread::spawn(move || {
            second.acquire_shared().unwrap();
            tx.send(()).unwrap();
            second.release_shared().unwrap();
        });

        // READ is a plain mutex here, so a second shared hold has to wait
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(200)),
            Err(RecvTimeoutError::Timeout)
        );
        first.release_shared().unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        reader.join().unwrap();
    }
}
