//! Validated lock names.

use crate::error::{LockError, Result};

/// A non-empty, NUL-free lock name shared by every cooperating process.
///
/// Names are kept as bytes: the System V backend only ever hashes them, and
/// the Windows backend turns them into C strings for the mutex names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockName(Vec<u8>);

impl LockName {
    pub fn new(name: impl AsRef<[u8]>) -> Result<Self> {
        let bytes = name.as_ref();
        if bytes.is_empty() {
            return Err(LockError::InvalidArgument("lock name is empty"));
        }
        if bytes.contains(&0) {
            return Err(LockError::InvalidArgument("lock name contains a NUL byte"));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Builds a name from a buffer and the length its producer declared.
    ///
    /// The first `len` bytes must be NUL-free and, when the buffer is longer,
    /// the byte at `len` must be the terminator. This catches callers whose
    /// length and content disagree.
    pub fn with_declared_len(buf: &[u8], len: usize) -> Result<Self> {
        if len == 0 {
            return Err(LockError::InvalidArgument("declared lock name length is zero"));
        }
        let Some(head) = buf.get(..len) else {
            return Err(LockError::InvalidArgument(
                "declared lock name length exceeds the buffer",
            ));
        };
        if head.contains(&0) {
            return Err(LockError::InvalidArgument(
                "lock name is shorter than its declared length",
            ));
        }
        match buf.get(len) {
            None | Some(0) => Ok(Self(head.to_vec())),
            Some(_) => Err(LockError::InvalidArgument(
                "lock name is longer than its declared length",
            )),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for LockName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl TryFrom<&str> for LockName {
    type Error = LockError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn rejects_empty_and_embedded_nul() {
        assert_eq!(LockName::new("").unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            LockName::new(b"cfg\0-7").unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(LockName::new("cfg-7").unwrap().as_bytes(), b"cfg-7");
    }

    #[test]
    fn declared_len_must_match_content() {
        assert_eq!(
            LockName::with_declared_len(b"cfg-7\0", 5).unwrap().as_bytes(),
            b"cfg-7"
        );
        assert!(LockName::with_declared_len(b"cfg-7", 5).is_ok());

        // terminator arrives early
        assert!(LockName::with_declared_len(b"cfg\0-7\0", 5).is_err());
        // content runs past the declared length
        assert!(LockName::with_declared_len(b"cfg-77\0", 5).is_err());
        assert!(LockName::with_declared_len(b"cfg", 5).is_err());
        assert!(LockName::with_declared_len(b"cfg", 0).is_err());
    }

    #[test]
    fn display_is_lossy_utf8() {
        let name = LockName::new("/etc/modsecurity/main.conf").unwrap();
        assert_eq!(name.to_string(), "/etc/modsecurity/main.conf");
    }
}
