//! Kernel-wide error types
//!
//! Every fallible path in the memory subsystem reports one of these variants.
//! The syscall layer flattens them into negative return codes; the fault path
//! turns them into a killed process (user context) or a panic (kernel
//! context).

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// The physical frame pool (or an intermediate page-table allocation)
    /// is exhausted.
    OutOfMemory {
        requested: usize,
    },
    /// A syscall argument failed validation.
    InvalidArgument {
        what: &'static str,
    },
    /// An address is outside the modeled user address space.
    InvalidAddress {
        addr: u64,
    },
    /// An address falls inside no live region.
    UnmappedMemory {
        addr: u64,
    },
    /// A FIXED mapping request intersects an existing region.
    RegionOverlap {
        addr: u64,
    },
    /// The per-process region table has no free slot.
    RegionTableFull,
    /// No gap in the mmap window can hold the requested length.
    AddressSpaceExhausted {
        length: usize,
    },
    /// A munmap request intersects no live region.
    NotFound {
        addr: u64,
    },
    /// A file descriptor does not name an open file.
    BadFileDescriptor {
        fd: i32,
    },
    /// A file-backed fault could not read the page.
    FileError {
        inode: u64,
    },
    /// An access violates the permissions of the region or mapping.
    PermissionDenied {
        access: &'static str,
    },
    /// The process was killed by an unresolvable fault.
    ProcessKilled,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory { requested } => {
                write!(f, "out of memory (requested {} bytes)", requested)
            }
            KernelError::InvalidArgument { what } => write!(f, "invalid argument: {}", what),
            KernelError::InvalidAddress { addr } => write!(f, "invalid address {:#x}", addr),
            KernelError::UnmappedMemory { addr } => write!(f, "unmapped memory at {:#x}", addr),
            KernelError::RegionOverlap { addr } => {
                write!(f, "mapping overlaps existing region at {:#x}", addr)
            }
            KernelError::RegionTableFull => write!(f, "region table full"),
            KernelError::AddressSpaceExhausted { length } => {
                write!(f, "no free virtual range of {} bytes", length)
            }
            KernelError::NotFound { addr } => {
                write!(f, "no region intersects {:#x}", addr)
            }
            KernelError::BadFileDescriptor { fd } => write!(f, "bad file descriptor {}", fd),
            KernelError::FileError { inode } => write!(f, "read failed on inode {}", inode),
            KernelError::PermissionDenied { access } => {
                write!(f, "permission denied: {}", access)
            }
            KernelError::ProcessKilled => write!(f, "process killed"),
        }
    }
}
