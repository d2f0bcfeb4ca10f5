//! Page Fault Resolution
//!
//! The trap dispatcher hands every page fault to [`handle_page_fault`],
//! which classifies the fault into exactly one [`FaultResolution`] tag and
//! performs the single matching repair:
//!
//! 1. address in no live region — fatal;
//! 2. absent entry inside a live region — lazy fill (zero or page-in);
//! 3. write to a present read-only entry of a writable private region —
//!    copy-on-write;
//! 4. write to a region without WRITE protection — fatal;
//! 5. anything else — fatal.
//!
//! Repair failures (pool exhaustion, file read errors) surface as kernel
//! errors; the trap layer decides whether that kills the process or panics.

use log::{trace, warn};

use crate::error::KernelError;
use crate::mm::page_table::PageTableEntry;
use crate::mm::vas::AddressSpace;
use crate::mm::{FramePool, PageFlags, Protection, VirtualAddress};

/// Kind of memory access that faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// Information about a page fault collected by the trap dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultInfo {
    /// The virtual address that caused the fault.
    pub address: VirtualAddress,
    /// Whether the access was a read or a write.
    pub access: AccessKind,
    /// Whether the fault occurred while executing in user mode.
    pub from_user: bool,
}

/// Why a fault cannot be repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// The address is inside no live region.
    UnknownRegion,
    /// A write to a region whose protection lacks WRITE.
    PermissionViolation,
    /// A fault the mapping state cannot explain.
    Spurious,
}

/// The single decision the resolver makes for a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResolution {
    LazyFill,
    CopyOnWrite,
    Fatal(FatalReason),
}

/// Classify a fault against the region table and page-table state.
///
/// First match wins; the order is the contract.
pub fn classify(
    space: &AddressSpace,
    pool: &FramePool,
    info: &PageFaultInfo,
) -> FaultResolution {
    let region = match space.find_region(info.address) {
        Some(region) => region,
        None => return FaultResolution::Fatal(FatalReason::UnknownRegion),
    };

    let entry = space.entry(pool, info.address);
    let present = entry.is_some_and(|e| e.is_present());
    if !present {
        return FaultResolution::LazyFill;
    }

    if info.access == AccessKind::Write {
        let writable = entry.is_some_and(|e| e.is_writable());
        if !writable {
            if region.prot.contains(Protection::WRITE) && region.is_private() {
                return FaultResolution::CopyOnWrite;
            }
            if !region.prot.contains(Protection::WRITE) {
                return FaultResolution::Fatal(FatalReason::PermissionViolation);
            }
        }
    }

    FaultResolution::Fatal(FatalReason::Spurious)
}

/// Resolve a page fault, mutating page tables (never region records).
pub fn handle_page_fault(
    space: &mut AddressSpace,
    pool: &mut FramePool,
    info: &PageFaultInfo,
) -> Result<(), KernelError> {
    match classify(space, pool, info) {
        FaultResolution::LazyFill => lazy_fill(space, pool, info),
        FaultResolution::CopyOnWrite => copy_on_write(space, pool, info),
        FaultResolution::Fatal(reason) => {
            warn!(
                "unresolvable fault at {:#x} ({:?}): {:?}",
                info.address.as_u64(),
                info.access,
                reason
            );
            Err(match reason {
                FatalReason::UnknownRegion => KernelError::UnmappedMemory {
                    addr: info.address.as_u64(),
                },
                FatalReason::PermissionViolation => KernelError::PermissionDenied {
                    access: "write to read-only region",
                },
                FatalReason::Spurious => KernelError::InvalidAddress {
                    addr: info.address.as_u64(),
                },
            })
        }
    }
}

/// Materialize the page containing the faulting address.
fn lazy_fill(
    space: &mut AddressSpace,
    pool: &mut FramePool,
    info: &PageFaultInfo,
) -> Result<(), KernelError> {
    let page = info.address.page_round_down();

    let (prot, backing) = {
        let region = space
            .find_region(info.address)
            .ok_or(KernelError::UnmappedMemory {
                addr: info.address.as_u64(),
            })?;
        (region.prot, region.file_offset_for(page))
    };

    let frame = pool.allocate()?;
    pool.zero_frame(frame);

    if let Some((inode, offset)) = backing {
        // Short reads are already zero-padded by the zeroed frame.
        if let Err(_err) = inode.read_at(offset, pool.frame_mut(frame)) {
            pool.release(frame);
            return Err(KernelError::FileError { inode: inode.ino() });
        }
    }

    let mut flags = PageFlags::USER;
    if prot.contains(Protection::WRITE) {
        flags |= PageFlags::WRITABLE;
    }
    if let Err(err) = space.table().map_page(pool, page, frame, flags) {
        pool.release(frame);
        return Err(err);
    }

    trace!(
        "lazy fill: mapped page {:#x} -> frame {}",
        page.as_u64(),
        frame.as_u64()
    );
    Ok(())
}

/// Give the faulting process a private writable copy of a shared page.
fn copy_on_write(
    space: &mut AddressSpace,
    pool: &mut FramePool,
    info: &PageFaultInfo,
) -> Result<(), KernelError> {
    let page = info.address.page_round_down();

    let slot = space
        .table()
        .walk(pool, page, false)?
        .ok_or(KernelError::InvalidAddress {
            addr: info.address.as_u64(),
        })?;
    let entry = slot.read(pool);
    let old = entry.frame().ok_or(KernelError::InvalidAddress {
        addr: info.address.as_u64(),
    })?;

    let copy = pool.allocate()?;
    pool.copy_frame(old, copy);
    slot.write(
        pool,
        PageTableEntry::new(copy, entry.flags() | PageFlags::WRITABLE),
    );
    pool.release(old);

    // The stale read-only translation must not outlive the new mapping.
    space.reload();

    trace!(
        "copy-on-write: page {:#x} frame {} -> {}",
        page.as_u64(),
        old.as_u64(),
        copy.as_u64()
    );
    Ok(())
}
