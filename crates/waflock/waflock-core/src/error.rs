//! Error taxonomy for named lock operations.
//!
//! Every failure is returned to the caller as a [`LockError`]. Nothing in this
//! crate retries a semaphore wait or aborts the process; rollback failures that
//! happen while unwinding an acquisition are logged and the original error is
//! returned.

use std::io;

/// Which kind of principal failed to resolve while creating a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    User,
    Group,
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Principal::User => f.write_str("user"),
            Principal::Group => f.write_str("group"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("owner {principal} '{name}' does not resolve")]
    IdentityResolution { principal: Principal, name: String },

    #[error("failed to create lock primitive during {stage}")]
    BackendCreate {
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to attach to existing lock primitive")]
    BackendOpen(#[source] io::Error),

    #[error("lock primitive {op} failed")]
    BackendOperation {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{0} is not supported by this platform backend")]
    Unsupported(&'static str),

    #[error("only one of the two named mutexes for '{name}' already existed")]
    InconsistentState { name: String },
}

/// Fieldless view of [`LockError`], the error code surfaced to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    IdentityResolutionFailure,
    BackendCreateFailure,
    BackendOpenFailure,
    BackendOperationFailure,
    UnsupportedOperation,
    InconsistentState,
}

impl LockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LockError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            LockError::IdentityResolution { .. } => ErrorKind::IdentityResolutionFailure,
            LockError::BackendCreate { .. } => ErrorKind::BackendCreateFailure,
            LockError::BackendOpen(_) => ErrorKind::BackendOpenFailure,
            LockError::BackendOperation { .. } => ErrorKind::BackendOperationFailure,
            LockError::Unsupported(_) => ErrorKind::UnsupportedOperation,
            LockError::InconsistentState { .. } => ErrorKind::InconsistentState,
        }
    }
}

pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_ignores_payload() {
        let err = LockError::BackendOperation {
            op: "decrement",
            source: io::Error::from_raw_os_error(22),
        };
        assert_eq!(err.kind(), ErrorKind::BackendOperationFailure);
        assert_eq!(
            LockError::Unsupported("destroy").kind(),
            ErrorKind::UnsupportedOperation
        );
    }

    #[test]
    fn identity_error_names_the_principal() {
        let err = LockError::IdentityResolution {
            principal: Principal::Group,
            name: "www-data".into(),
        };
        assert_eq!(err.to_string(), "owner group 'www-data' does not resolve");
    }
}
