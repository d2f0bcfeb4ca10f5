//! Memory management system calls
//!
//! Kernel-side implementations of:
//! - `mmap(addr, length, prot, flags, fd, offset)` — reserve a region;
//!   materialization is entirely deferred to the fault resolver.
//! - `munmap(addr, length)` — release any part of any regions.
//!
//! Validation order matches the syscall contract and short-circuits; a
//! failed call leaves the process exactly as it was.

use alloc::sync::Arc;

use super::{validate_user_range, SyscallError, SyscallResult};
use crate::mm::region::Backing;
use crate::mm::vas::MmapRequest;
use crate::mm::{page_round_up, MapFlags, Protection, VirtualAddress, PAGE_SIZE};
use crate::process::Process;

/// Pages may be read.
pub const PROT_READ: u32 = 0x1;
/// Pages may be written.
pub const PROT_WRITE: u32 = 0x2;

/// Writes stay private to this process.
pub const MAP_PRIVATE: u32 = 0x1;
/// Writes are shared with other mappings of the object.
pub const MAP_SHARED: u32 = 0x2;
/// No backing file; pages are zero-filled on first touch.
pub const MAP_ANONYMOUS: u32 = 0x4;
/// Place the mapping at exactly the requested address.
pub const MAP_FIXED: u32 = 0x8;

/// Sentinel value indicating a failed mapping (`-1` cast to a pointer).
pub const MAP_FAILED: usize = usize::MAX;

/// Map a region into the calling process's address space.
///
/// Returns the placed base address. No page is faulted in here; the first
/// touch of each page goes through the fault resolver.
pub fn sys_mmap(
    process: &Process,
    addr: u64,
    length: i64,
    prot: u32,
    flags: u32,
    fd: i32,
    offset: i64,
) -> SyscallResult {
    if length <= 0 {
        return Err(SyscallError::InvalidArgument);
    }
    let length = length as usize;

    let prot = Protection::from_bits(prot).ok_or(SyscallError::InvalidArgument)?;

    let flags = MapFlags::from_bits(flags).ok_or(SyscallError::InvalidArgument)?;
    if flags.contains(MapFlags::PRIVATE) == flags.contains(MapFlags::SHARED) {
        return Err(SyscallError::InvalidArgument);
    }

    // The file reference is taken only once every check has passed, so a
    // failing call never touches a file's reference count.
    let backing = if flags.contains(MapFlags::ANONYMOUS) {
        if fd != -1 {
            return Err(SyscallError::InvalidArgument);
        }
        Backing::Anonymous
    } else {
        if offset < 0 {
            return Err(SyscallError::InvalidArgument);
        }
        let file = process
            .files
            .lock()
            .get(fd)
            .ok_or(SyscallError::BadFileDescriptor)?;
        if !file.readable {
            return Err(SyscallError::PermissionDenied);
        }
        Backing::File {
            inode: Arc::clone(&file.inode),
            offset: offset as u64,
        }
    };

    if flags.contains(MapFlags::FIXED) {
        if addr % PAGE_SIZE as u64 != 0 {
            return Err(SyscallError::InvalidArgument);
        }
        validate_user_range(addr, page_round_up(length))?;
    }

    let start = process
        .space
        .lock()
        .mmap(MmapRequest {
            addr: VirtualAddress::new(addr),
            length,
            prot,
            flags,
            backing,
        })
        .map_err(SyscallError::from)?;
    Ok(start.as_usize())
}

/// Unmap `[addr, addr + length)` from the calling process.
///
/// The range may cover any number of regions and may clip them; a request
/// intersecting no live region fails. Returns 0.
pub fn sys_munmap(process: &Process, addr: u64, length: i64) -> SyscallResult {
    if length <= 0 {
        return Err(SyscallError::InvalidArgument);
    }
    if addr % PAGE_SIZE as u64 != 0 {
        return Err(SyscallError::InvalidArgument);
    }
    let length = page_round_up(length as usize);
    validate_user_range(addr, length)?;

    let mut space = process.space.lock();
    let mut pool = process.pool().lock();
    space
        .munmap(&mut pool, VirtualAddress::new(addr), length)
        .map_err(SyscallError::from)?;
    Ok(0)
}
