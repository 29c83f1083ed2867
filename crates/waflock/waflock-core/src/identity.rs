//! Owner principals for newly created locks.
//!
//! Only the process that actually creates the System V semaphore set resolves
//! the owner; attachers never touch permissions. The Windows backend ignores
//! the owner entirely and relies on the default security descriptor.

/// User and group that will own a newly created lock primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub user: String,
    pub group: String,
}

impl Owner {
    /// Owner whose group has the same name as the user, e.g. `www-data`.
    pub fn new(name: impl Into<String>) -> Self {
        let user = name.into();
        Self {
            group: user.clone(),
            user,
        }
    }

    pub fn with_group(user: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            group: group.into(),
        }
    }
}

#[cfg(unix)]
pub use unix::{resolve_group, resolve_user};

#[cfg(unix)]
mod unix {
    use crate::error::{LockError, Principal, Result};
    use std::ffi::CString;
    use std::ptr;

    const FALLBACK_BUF_LEN: usize = 1024;
    const MAX_BUF_LEN: usize = 1 << 20;

    fn initial_buf_len(name: libc::c_int) -> usize {
        let len = unsafe { libc::sysconf(name) };
        if len > 0 { len as usize } else { FALLBACK_BUF_LEN }
    }

    fn c_name(name: &str) -> Result<CString> {
        CString::new(name).map_err(|_| LockError::InvalidArgument("owner name contains a NUL byte"))
    }

    fn unresolved(principal: Principal, name: &str) -> LockError {
        LockError::IdentityResolution {
            principal,
            name: name.to_owned(),
        }
    }

    /// Looks up a user id with the reentrant `getpwnam_r`.
    pub fn resolve_user(name: &str) -> Result<libc::uid_t> {
        let cname = c_name(name)?;
        let mut buf: Vec<libc::c_char> = vec![0; initial_buf_len(libc::_SC_GETPW_R_SIZE_MAX)];
        loop {
            // SAFETY: passwd is plain old data; getpwnam_r fills it and points
            // its string fields into `buf`, which outlives this iteration.
            let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
            let mut found: *mut libc::passwd = ptr::null_mut();
            let rc = unsafe {
                libc::getpwnam_r(
                    cname.as_ptr(),
                    &mut pwd,
                    buf.as_mut_ptr(),
                    buf.len(),
                    &mut found,
                )
            };
            if rc == libc::ERANGE && buf.len() < MAX_BUF_LEN {
                buf.resize(buf.len() * 2, 0);
                continue;
            }
            if rc != 0 || found.is_null() {
                return Err(unresolved(Principal::User, name));
            }
            return Ok(pwd.pw_uid);
        }
    }

    /// Looks up a group id with the reentrant `getgrnam_r`.
    pub fn resolve_group(name: &str) -> Result<libc::gid_t> {
        let cname = c_name(name)?;
        let mut buf: Vec<libc::c_char> = vec![0; initial_buf_len(libc::_SC_GETGR_R_SIZE_MAX)];
        loop {
            // SAFETY: see resolve_user.
            let mut grp: libc::group = unsafe { std::mem::zeroed() };
            let mut found: *mut libc::group = ptr::null_mut();
            let rc = unsafe {
                libc::getgrnam_r(
                    cname.as_ptr(),
                    &mut grp,
                    buf.as_mut_ptr(),
                    buf.len(),
                    &mut found,
                )
            };
            if rc == libc::ERANGE && buf.len() < MAX_BUF_LEN {
                buf.resize(buf.len() * 2, 0);
                continue;
            }
            if rc != 0 || found.is_null() {
                return Err(unresolved(Principal::Group, name));
            }
            return Ok(grp.gr_gid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_defaults_group_to_user() {
        let owner = Owner::new("www-data");
        assert_eq!(owner.user, "www-data");
        assert_eq!(owner.group, "www-data");
        assert_eq!(Owner::with_group("apache", "web").group, "web");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn root_resolves_to_zero() {
        assert_eq!(resolve_user("root").unwrap(), 0);
        assert_eq!(resolve_group("root").unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn unknown_principal_is_identity_failure() {
        use crate::error::{ErrorKind, LockError, Principal};

        let err = resolve_user("waflock-no-such-user").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdentityResolutionFailure);
        let err = resolve_group("waflock-no-such-group").unwrap_err();
        assert!(matches!(
            err,
            LockError::IdentityResolution { principal: Principal::Group, .. }
        ));
    }
}
