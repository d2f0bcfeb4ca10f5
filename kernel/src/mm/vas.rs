//! Virtual Address Space management
//!
//! Ties one process's region table to its page table hierarchy and carries
//! the two syscall engines: `mmap` (reserve, never materialize) and `munmap`
//! (release pages, then remove/trim/split regions atomically). Fork and
//! teardown walk both structures together, which is where the
//! copy-on-write window is armed and where every frame is returned exactly
//! once.

use core::sync::atomic::{AtomicU64, Ordering};

use alloc::vec::Vec;

use log::debug;

use crate::error::KernelError;
use crate::mm::page_table::{PageTable, PageTableEntry};
use crate::mm::region::{Backing, Region, RegionTable};
use crate::mm::{
    page_round_up, FrameNumber, FramePool, MapFlags, PageFlags, Protection, VirtualAddress,
    PAGE_SIZE, USER_TOP,
};

/// A validated mmap request, as handed down by the syscall layer.
///
/// `addr` is only meaningful when `flags` contains `FIXED`; `length` is
/// positive but not yet page-rounded.
pub struct MmapRequest {
    pub addr: VirtualAddress,
    pub length: usize,
    pub prot: Protection,
    pub flags: MapFlags,
    pub backing: Backing,
}

/// How the region table must change for one region overlapped by a munmap.
enum TableFix {
    Remove,
    TrimLeft(VirtualAddress),
    TrimRight(usize),
    Split(VirtualAddress, VirtualAddress),
}

/// Virtual Address Space for a process
pub struct AddressSpace {
    /// Hardware-format page tables rooted in a pool frame
    table: PageTable,
    /// Live regions, the authority over reserved address ranges
    regions: RegionTable,
    /// Bumped on every bulk page-table change; the model of reloading the
    /// page-directory base register on the (single) CPU.
    tlb_generation: AtomicU64,
}

impl AddressSpace {
    /// Create an empty address space with a fresh root directory.
    pub fn new(pool: &mut FramePool) -> Result<Self, KernelError> {
        Ok(Self {
            table: PageTable::new(pool)?,
            regions: RegionTable::new(),
            tlb_generation: AtomicU64::new(0),
        })
    }

    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    /// Region containing `va`, if any.
    pub fn find_region(&self, va: VirtualAddress) -> Option<&Region> {
        self.regions.find(va)
    }

    /// Leaf page-table entry for `va`, if its leaf table exists.
    pub fn entry(&self, pool: &FramePool, va: VirtualAddress) -> Option<PageTableEntry> {
        self.table.entry(pool, va)
    }

    /// Translate `va` to its backing frame and flags, when present.
    pub fn translate(
        &self,
        pool: &FramePool,
        va: VirtualAddress,
    ) -> Option<(FrameNumber, PageFlags)> {
        self.table.translate(pool, va)
    }

    /// Every user page currently materialized, in address order.
    pub fn mapped_pages(&self, pool: &FramePool) -> Vec<(VirtualAddress, FrameNumber)> {
        self.table.mapped_pages(pool)
    }

    pub(crate) fn table(&self) -> &PageTable {
        &self.table
    }

    /// Reload the page-directory base register: invalidates every cached
    /// translation on this CPU.
    pub fn reload(&self) {
        self.tlb_generation.fetch_add(1, Ordering::Release);
    }

    pub fn tlb_generation(&self) -> u64 {
        self.tlb_generation.load(Ordering::Acquire)
    }

    /// The mmap engine: place and record a region.
    ///
    /// No page is materialized here; first touch goes through the fault
    /// resolver. On any error the address space is exactly as before.
    pub fn mmap(&mut self, req: MmapRequest) -> Result<VirtualAddress, KernelError> {
        let length = page_round_up(req.length);

        let start = if req.flags.contains(MapFlags::FIXED) {
            if !req.addr.is_page_aligned() {
                return Err(KernelError::InvalidArgument {
                    what: "fixed mapping address not page-aligned",
                });
            }
            if req.addr.as_u64() + length as u64 > USER_TOP {
                return Err(KernelError::InvalidAddress {
                    addr: req.addr.as_u64(),
                });
            }
            if !self.regions.range_is_free(req.addr, length) {
                return Err(KernelError::RegionOverlap {
                    addr: req.addr.as_u64(),
                });
            }
            req.addr
        } else {
            self.regions
                .find_free_range(length)
                .ok_or(KernelError::AddressSpaceExhausted { length })?
        };

        self.regions.insert(Region {
            start,
            len: length,
            prot: req.prot,
            flags: req.flags,
            backing: req.backing,
        })?;

        debug!(
            "mmap: placed region [{:#x}, {:#x}) prot={:?}",
            start.as_u64(),
            start.as_u64() + length as u64,
            req.prot
        );
        Ok(start)
    }

    /// The munmap engine: release `[addr, addr + length)`.
    ///
    /// The request may clip any number of regions. The whole call is atomic:
    /// table feasibility (split slots) is proven before the first PTE is
    /// cleared, so a failure leaves regions and page tables untouched.
    ///
    /// `addr` and `length` must be page-aligned (the syscall layer rounds
    /// the length up).
    pub fn munmap(
        &mut self,
        pool: &mut FramePool,
        addr: VirtualAddress,
        length: usize,
    ) -> Result<(), KernelError> {
        debug_assert!(addr.is_page_aligned() && length % PAGE_SIZE == 0 && length > 0);
        let end = addr.add(length);

        let overlapped = self.regions.overlapping(addr, end);
        if overlapped.is_empty() {
            return Err(KernelError::NotFound { addr: addr.as_u64() });
        }

        // Plan every table mutation up front.
        let mut plan: Vec<(VirtualAddress, VirtualAddress, VirtualAddress, TableFix)> = Vec::new();
        let mut removals = 0usize;
        let mut splits = 0usize;
        for &start in &overlapped {
            let region = match self.regions.find(start) {
                Some(region) => region,
                None => continue,
            };
            let clip_start = region.start.max(addr);
            let clip_end = region.end().min(end);
            let fix = match (clip_start == region.start, clip_end == region.end()) {
                (true, true) => {
                    removals += 1;
                    TableFix::Remove
                }
                (true, false) => TableFix::TrimLeft(clip_end),
                (false, true) => {
                    TableFix::TrimRight((clip_start.as_u64() - start.as_u64()) as usize)
                }
                (false, false) => {
                    splits += 1;
                    TableFix::Split(clip_start, clip_end)
                }
            };
            plan.push((start, clip_start, clip_end, fix));
        }

        // Full removals free slots that splits may then occupy.
        if splits > self.regions.free_slots() + removals {
            return Err(KernelError::RegionTableFull);
        }

        // Point of no return: release backing frames. Pages never faulted
        // in have no PTE, and clear_and_free skips them.
        for (_, clip_start, clip_end, _) in &plan {
            let mut va = *clip_start;
            while va < *clip_end {
                self.table.clear_and_free(pool, va);
                va = va.add(PAGE_SIZE);
            }
        }

        // Apply table fixes, removals first so split slots are available.
        for (start, _, _, fix) in &plan {
            if let TableFix::Remove = fix {
                self.regions.remove(*start);
            }
        }
        for (start, _, _, fix) in &plan {
            match fix {
                TableFix::Remove => {}
                TableFix::TrimLeft(new_start) => self.regions.shrink_left(*start, *new_start),
                TableFix::TrimRight(new_len) => self.regions.shrink_right(*start, *new_len),
                TableFix::Split(hole_start, hole_end) => {
                    // Feasibility was proven above.
                    self.regions.split(*start, *hole_start, *hole_end)?;
                }
            }
        }

        self.reload();
        debug!(
            "munmap: released [{:#x}, {:#x}) across {} region(s)",
            addr.as_u64(),
            end.as_u64(),
            plan.len()
        );
        Ok(())
    }

    /// Duplicate this address space for a forked child.
    ///
    /// Regions are copied. For every present page of a private region with
    /// WRITE protection, both sides are left pointing at the shared frame
    /// with the writable bit cleared, arming copy-on-write; other present
    /// pages are deep-copied. Pages never faulted in stay absent and fault
    /// in privately on each side.
    pub fn fork(&mut self, pool: &mut FramePool) -> Result<AddressSpace, KernelError> {
        let mut child = AddressSpace::new(pool)?;
        match self.fork_into(&mut child, pool) {
            Ok(()) => {
                self.reload();
                Ok(child)
            }
            Err(err) => {
                child.teardown(pool);
                Err(err)
            }
        }
    }

    fn fork_into(
        &mut self,
        child: &mut AddressSpace,
        pool: &mut FramePool,
    ) -> Result<(), KernelError> {
        for region in self.regions.iter() {
            child.regions.insert(region.clone())?;
        }

        for region in self.regions.iter() {
            let cow = region.is_private() && region.prot.contains(Protection::WRITE);
            let pages = region.len / PAGE_SIZE;
            for index in 0..pages {
                let va = region.start.add(index * PAGE_SIZE);
                let slot = match self.table.walk(pool, va, false)? {
                    Some(slot) => slot,
                    None => continue,
                };
                let entry = slot.read(pool);
                let frame = match entry.frame() {
                    Some(frame) => frame,
                    None => continue,
                };

                if cow {
                    // Share the frame read-only on both sides.
                    let shared = entry.flags() - PageFlags::WRITABLE;
                    slot.write(pool, PageTableEntry::new(frame, shared));
                    pool.retain(frame);
                    if let Err(err) =
                        child.table.map_page(pool, va, frame, shared - PageFlags::PRESENT)
                    {
                        pool.release(frame);
                        return Err(err);
                    }
                } else {
                    let copy = pool.allocate()?;
                    pool.copy_frame(frame, copy);
                    if let Err(err) =
                        child
                            .table
                            .map_page(pool, va, copy, entry.flags() - PageFlags::PRESENT)
                    {
                        pool.release(copy);
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    /// Destroy the address space at process exit.
    ///
    /// Every backing frame is released exactly once (shared frames via
    /// their reference count), then the page-table frames themselves. The
    /// space must not be used afterwards.
    pub fn teardown(&mut self, pool: &mut FramePool) {
        let spans: Vec<(VirtualAddress, usize)> = self
            .regions
            .iter()
            .map(|region| (region.start, region.len))
            .collect();
        for (start, len) in spans {
            let mut va = start;
            let end = start.add(len);
            while va < end {
                self.table.clear_and_free(pool, va);
                va = va.add(PAGE_SIZE);
            }
            self.regions.remove(start);
        }
        self.table.free_tables(pool);
        self.reload();
    }
}
