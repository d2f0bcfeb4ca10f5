//! System call interface for FerriteOS
//!
//! The kernel-side surface of the memory syscalls, plus the thin
//! argument-validation boundary: user-supplied pointers are checked against
//! the caller's address space before any engine sees them, and every error
//! flattens to `-1` at the user boundary while keeping its kind for
//! kernel-side callers.

pub mod memory;

use crate::error::KernelError;
use crate::mm::USER_TOP;

/// System call error codes, returned to user space as negative values.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall = -1,
    InvalidArgument = -2,
    BadFileDescriptor = -3,
    Overlap = -4,
    OutOfMemory = -5,
    NotFound = -6,
    PermissionDenied = -7,
    IoError = -8,
    Interrupted = -9,
}

impl From<KernelError> for SyscallError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::OutOfMemory { .. }
            | KernelError::RegionTableFull
            | KernelError::AddressSpaceExhausted { .. } => SyscallError::OutOfMemory,
            KernelError::InvalidArgument { .. } | KernelError::InvalidAddress { .. } => {
                SyscallError::InvalidArgument
            }
            KernelError::RegionOverlap { .. } => SyscallError::Overlap,
            KernelError::UnmappedMemory { .. } | KernelError::NotFound { .. } => {
                SyscallError::NotFound
            }
            KernelError::BadFileDescriptor { .. } => SyscallError::BadFileDescriptor,
            KernelError::FileError { .. } => SyscallError::IoError,
            KernelError::PermissionDenied { .. } => SyscallError::PermissionDenied,
            KernelError::ProcessKilled => SyscallError::Interrupted,
        }
    }
}

/// System call result type
pub type SyscallResult = Result<usize, SyscallError>;

/// Flatten a syscall result into the word handed back to user space:
/// the value on success, `-1` on any failure.
pub fn pack_result(result: SyscallResult) -> isize {
    match result {
        Ok(value) => value as isize,
        Err(_) => -1,
    }
}

/// Validate that `[addr, addr + len)` lies inside the caller's address
/// space. The argument fetcher applies this to every user pointer before
/// the core sees it.
pub fn validate_user_range(addr: u64, len: usize) -> Result<(), SyscallError> {
    let end = addr
        .checked_add(len as u64)
        .ok_or(SyscallError::InvalidArgument)?;
    if addr < USER_TOP && end <= USER_TOP {
        Ok(())
    } else {
        Err(SyscallError::InvalidArgument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_result() {
        assert_eq!(pack_result(Ok(0x1000_0000)), 0x1000_0000);
        assert_eq!(pack_result(Err(SyscallError::OutOfMemory)), -1);
    }

    #[test]
    fn test_validate_user_range() {
        assert!(validate_user_range(0, 4096).is_ok());
        assert!(validate_user_range(USER_TOP - 4096, 4096).is_ok());
        assert!(validate_user_range(USER_TOP - 4096, 8192).is_err());
        assert!(validate_user_range(USER_TOP, 0).is_err());
        assert!(validate_user_range(u64::MAX, 4096).is_err());
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            SyscallError::from(KernelError::RegionTableFull),
            SyscallError::OutOfMemory
        );
        assert_eq!(
            SyscallError::from(KernelError::RegionOverlap { addr: 0x1000 }),
            SyscallError::Overlap
        );
        assert_eq!(
            SyscallError::from(KernelError::NotFound { addr: 0x1000 }),
            SyscallError::NotFound
        );
    }
}
