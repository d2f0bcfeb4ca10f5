//! Memory management module
//!
//! Address types, page constants, and the permission/flag vocabulary shared
//! by the region table, the page tables, and the fault resolver.

pub mod frame_allocator;
pub mod page_fault;
pub mod page_table;
pub mod region;
pub mod usermem;
pub mod vas;

pub use frame_allocator::{FrameNumber, FramePool, FRAME_SIZE};

use bitflags::bitflags;

/// Size of a virtual page (and of a physical frame)
pub const PAGE_SIZE: usize = 4096;

/// Exclusive top of the modeled user address space (1 GiB)
pub const USER_TOP: u64 = 0x4000_0000;

/// Bottom of the kernel-chosen mmap placement window
pub const MMAP_BASE: u64 = 0x1000_0000;

/// Exclusive top of the mmap placement window; the stack guard sits above
pub const MMAP_TOP: u64 = 0x3000_0000;

/// Per-process region table capacity
pub const MAX_MMAPS: usize = 32;

/// Virtual memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub const fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }

    /// Round down to the containing page boundary
    pub const fn page_round_down(&self) -> Self {
        Self(self.0 & !(PAGE_SIZE as u64 - 1))
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.0 % PAGE_SIZE as u64 == 0
    }

    /// Offset of this address within its page
    pub const fn page_offset(&self) -> usize {
        (self.0 & (PAGE_SIZE as u64 - 1)) as usize
    }

    /// Inside the modeled user address space?
    pub const fn is_user(&self) -> bool {
        self.0 < USER_TOP
    }
}

/// Round a byte length up to a whole number of pages
pub const fn page_round_up(len: usize) -> usize {
    (len + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

bitflags! {
    /// Access permissions requested for a region (`PROT_*`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u32 {
        const READ = 0x1;
        const WRITE = 0x2;
    }
}

bitflags! {
    /// Mapping flags recorded on a region (`MAP_*`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        const PRIVATE = 0x1;
        const SHARED = 0x2;
        const ANONYMOUS = 0x4;
        const FIXED = 0x8;
    }
}

bitflags! {
    /// Permission bits of a hardware-format page-table entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
    }
}
