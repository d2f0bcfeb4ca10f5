//! Per-process region table
//!
//! An ordered set of non-overlapping virtual-memory regions with backing
//! metadata, capacity [`MAX_MMAPS`]. The table is the authority on which
//! addresses a process has reserved; the page tables only ever hold user
//! mappings inside a live region.
//!
//! The placement policy for kernel-chosen addresses also lives here, since
//! it is a pure function of the table: lowest aligned gap in the mmap
//! window wins, which callers observe as monotonically increasing addresses
//! for back-to-back requests.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::KernelError;
use crate::fs::Inode;
use crate::mm::{
    MapFlags, Protection, VirtualAddress, MAX_MMAPS, MMAP_BASE, MMAP_TOP, PAGE_SIZE,
};

/// How a region's pages are materialized on first touch.
#[derive(Clone)]
pub enum Backing {
    /// Zero-filled on fault
    Anonymous,
    /// Paged in from `inode` starting at byte `offset`
    File { inode: Arc<Inode>, offset: u64 },
}

/// One contiguous reserved span of a process's address space.
///
/// `start` and `len` are page-aligned; backing pages are installed lazily by
/// the fault resolver, so any subset of the span may be unmapped in the
/// hardware table at a given moment.
#[derive(Clone)]
pub struct Region {
    pub start: VirtualAddress,
    pub len: usize,
    pub prot: Protection,
    pub flags: MapFlags,
    pub backing: Backing,
}

impl Region {
    /// Exclusive end address
    pub fn end(&self) -> VirtualAddress {
        self.start.add(self.len)
    }

    pub fn contains(&self, va: VirtualAddress) -> bool {
        va >= self.start && va < self.end()
    }

    /// Interval overlap test against `[start, end)`
    pub fn overlaps(&self, start: VirtualAddress, end: VirtualAddress) -> bool {
        self.start < end && start < self.end()
    }

    pub fn is_private(&self) -> bool {
        self.flags.contains(MapFlags::PRIVATE)
    }

    /// File offset backing the page that contains `va`.
    ///
    /// Only meaningful for file-backed regions; anonymous regions have no
    /// offset and yield `None`.
    pub fn file_offset_for(&self, va: VirtualAddress) -> Option<(Arc<Inode>, u64)> {
        match &self.backing {
            Backing::Anonymous => None,
            Backing::File { inode, offset } => {
                let page = va.page_round_down();
                Some((
                    Arc::clone(inode),
                    offset + (page.as_u64() - self.start.as_u64()),
                ))
            }
        }
    }
}

/// The ordered, bounded set of a process's live regions.
pub struct RegionTable {
    regions: BTreeMap<VirtualAddress, Region>,
}

impl RegionTable {
    pub fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Slots left before the table refuses inserts.
    pub fn free_slots(&self) -> usize {
        MAX_MMAPS - self.regions.len()
    }

    /// Insert a region, enforcing capacity and disjointness.
    ///
    /// The mmap engine has already placed the region in a free range;
    /// the neighbor check here is the table's own guarantee, not a policy.
    pub fn insert(&mut self, region: Region) -> Result<(), KernelError> {
        if self.regions.len() >= MAX_MMAPS {
            return Err(KernelError::RegionTableFull);
        }
        if !self.range_is_free(region.start, region.len) {
            return Err(KernelError::RegionOverlap {
                addr: region.start.as_u64(),
            });
        }
        self.regions.insert(region.start, region);
        Ok(())
    }

    /// Region containing `va`, if any.
    pub fn find(&self, va: VirtualAddress) -> Option<&Region> {
        self.regions
            .range(..=va)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.contains(va))
    }

    pub fn remove(&mut self, start: VirtualAddress) -> Option<Region> {
        self.regions.remove(&start)
    }

    /// Drop `[start, new_start)` from the front of the region at `start`.
    pub fn shrink_left(&mut self, start: VirtualAddress, new_start: VirtualAddress) {
        if let Some(mut region) = self.regions.remove(&start) {
            region.len -= (new_start.as_u64() - region.start.as_u64()) as usize;
            region.start = new_start;
            if let Backing::File { offset, .. } = &mut region.backing {
                *offset += new_start.as_u64() - start.as_u64();
            }
            self.regions.insert(new_start, region);
        }
    }

    /// Drop everything past `new_len` from the region at `start`.
    pub fn shrink_right(&mut self, start: VirtualAddress, new_len: usize) {
        if let Some(region) = self.regions.get_mut(&start) {
            region.len = new_len;
        }
    }

    /// Punch `[hole_start, hole_end)` out of the middle of the region at
    /// `start`, leaving two live regions. Requires one free slot.
    pub fn split(
        &mut self,
        start: VirtualAddress,
        hole_start: VirtualAddress,
        hole_end: VirtualAddress,
    ) -> Result<(), KernelError> {
        if self.regions.len() >= MAX_MMAPS {
            return Err(KernelError::RegionTableFull);
        }
        let region = match self.regions.get(&start) {
            Some(region) => region.clone(),
            None => return Err(KernelError::NotFound { addr: start.as_u64() }),
        };

        let mut upper = region.clone();
        upper.len = (region.end().as_u64() - hole_end.as_u64()) as usize;
        upper.start = hole_end;
        if let Backing::File { offset, .. } = &mut upper.backing {
            *offset += hole_end.as_u64() - region.start.as_u64();
        }

        self.shrink_right(start, (hole_start.as_u64() - start.as_u64()) as usize);
        self.regions.insert(hole_end, upper);
        Ok(())
    }

    /// Starts of the live regions overlapping `[start, end)`, in order.
    pub fn overlapping(&self, start: VirtualAddress, end: VirtualAddress) -> Vec<VirtualAddress> {
        self.regions
            .values()
            .filter(|region| region.overlaps(start, end))
            .map(|region| region.start)
            .collect()
    }

    /// Is `[start, start + len)` disjoint from every live region?
    pub fn range_is_free(&self, start: VirtualAddress, len: usize) -> bool {
        let end = start.add(len);
        self.regions
            .values()
            .all(|region| !region.overlaps(start, end))
    }

    /// Placement policy: lowest aligned gap of `len` bytes inside the mmap
    /// window, or `None` when the window is exhausted.
    pub fn find_free_range(&self, len: usize) -> Option<VirtualAddress> {
        debug_assert!(len % PAGE_SIZE == 0 && len > 0);
        let mut cursor = MMAP_BASE;
        for region in self.regions.values() {
            let r_start = region.start.as_u64();
            let r_end = region.end().as_u64();
            if r_end <= cursor {
                continue;
            }
            if r_start >= MMAP_TOP {
                break;
            }
            if r_start >= cursor && r_start - cursor >= len as u64 {
                return Some(VirtualAddress::new(cursor));
            }
            cursor = r_end;
        }
        if cursor + len as u64 <= MMAP_TOP {
            Some(VirtualAddress::new(cursor))
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::new()
    }
}
