//! Property tests for the region/page-table invariants
//!
//! Random mmap/munmap/touch sequences, checked after every step:
//! - live regions are pairwise disjoint and page-aligned;
//! - every materialized user page lies inside exactly one live region;
//! - a failed call leaves regions, page tables, and the frame pool
//!   byte-for-byte as they were.

use std::sync::Arc;

use proptest::prelude::*;
use spin::Mutex;

use ferrite_kernel::mm::usermem::{read_byte, write_byte};
use ferrite_kernel::mm::{FramePool, Protection, MMAP_BASE, MMAP_TOP, PAGE_SIZE};
use ferrite_kernel::process::Process;
use ferrite_kernel::syscall::memory::{
    sys_mmap, sys_munmap, MAP_ANONYMOUS, MAP_FIXED, MAP_PRIVATE, PROT_READ, PROT_WRITE,
};

#[derive(Debug, Clone)]
enum Op {
    /// Non-fixed anonymous mapping of `pages` pages.
    Mmap { pages: usize, writable: bool },
    /// Fixed anonymous mapping at a window offset.
    MmapFixed { page_offset: usize, pages: usize },
    /// Unmap an arbitrary window range.
    Munmap { page_offset: usize, pages: usize },
    /// Touch a page of the `index`-th live region.
    Touch { index: usize, page: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..5, any::<bool>()).prop_map(|(pages, writable)| Op::Mmap { pages, writable }),
        (0usize..64, 1usize..5)
            .prop_map(|(page_offset, pages)| Op::MmapFixed { page_offset, pages }),
        (0usize..64, 1usize..8).prop_map(|(page_offset, pages)| Op::Munmap { page_offset, pages }),
        (0usize..8, 0usize..5).prop_map(|(index, page)| Op::Touch { index, page }),
    ]
}

/// Everything an observer can see of the process's memory state.
#[derive(Debug, PartialEq, Eq)]
struct Snapshot {
    regions: Vec<(u64, usize)>,
    pages: Vec<(u64, u64)>,
    frames_in_use: usize,
}

fn snapshot(proc: &Process) -> Snapshot {
    let space = proc.space.lock();
    let pool = proc.pool().lock();
    Snapshot {
        regions: space
            .regions()
            .iter()
            .map(|r| (r.start.as_u64(), r.len))
            .collect(),
        pages: space
            .mapped_pages(&pool)
            .into_iter()
            .map(|(va, frame)| (va.as_u64(), frame.as_u64()))
            .collect(),
        frames_in_use: pool.frames_in_use(),
    }
}

fn check_invariants(proc: &Process) {
    let space = proc.space.lock();
    let pool = proc.pool().lock();

    // Disjointness and alignment.
    let regions: Vec<_> = space
        .regions()
        .iter()
        .map(|r| (r.start.as_u64(), r.end().as_u64()))
        .collect();
    for (start, end) in &regions {
        assert_eq!(start % PAGE_SIZE as u64, 0);
        assert_eq!(end % PAGE_SIZE as u64, 0);
        assert!(start < end);
    }
    for pair in regions.windows(2) {
        // The table iterates in address order.
        assert!(pair[0].1 <= pair[1].0, "overlapping regions: {:?}", pair);
    }

    // Coverage: every materialized page lies inside exactly one region.
    for (va, _) in space.mapped_pages(&pool) {
        let holders = regions
            .iter()
            .filter(|(start, end)| va.as_u64() >= *start && va.as_u64() < *end)
            .count();
        assert_eq!(holders, 1, "page {:#x} held by {} regions", va.as_u64(), holders);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_op_sequences_preserve_invariants(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let proc = Process::new(Arc::new(Mutex::new(FramePool::new(512)))).unwrap();

        for op in ops {
            let before = snapshot(&proc);
            let failed = match op {
                Op::Mmap { pages, writable } => {
                    let prot = if writable { PROT_READ | PROT_WRITE } else { PROT_READ };
                    sys_mmap(
                        &proc,
                        0,
                        (pages * PAGE_SIZE) as i64,
                        prot,
                        MAP_ANONYMOUS | MAP_PRIVATE,
                        -1,
                        0,
                    )
                    .is_err()
                }
                Op::MmapFixed { page_offset, pages } => {
                    let addr = MMAP_BASE + (page_offset * PAGE_SIZE) as u64;
                    sys_mmap(
                        &proc,
                        addr,
                        (pages * PAGE_SIZE) as i64,
                        PROT_READ | PROT_WRITE,
                        MAP_ANONYMOUS | MAP_PRIVATE | MAP_FIXED,
                        -1,
                        0,
                    )
                    .is_err()
                }
                Op::Munmap { page_offset, pages } => {
                    let addr = MMAP_BASE + (page_offset * PAGE_SIZE) as u64;
                    sys_munmap(&proc, addr, (pages * PAGE_SIZE) as i64).is_err()
                }
                Op::Touch { index, page } => {
                    let target = {
                        let space = proc.space.lock();
                        let found = space.regions().iter().nth(index).map(|r| {
                            let page = page % (r.len / PAGE_SIZE);
                            (r.start.add(page * PAGE_SIZE), r.prot)
                        });
                        found
                    };
                    match target {
                        Some((va, prot)) if prot.contains(Protection::WRITE) => {
                            write_byte(&proc, va, 0x5A).unwrap();
                            false
                        }
                        Some((va, _)) => {
                            prop_assert_eq!(read_byte(&proc, va).unwrap(), 0);
                            false
                        }
                        None => false,
                    }
                }
            };

            if failed {
                // Atomicity: a failed call changed nothing observable.
                prop_assert_eq!(before, snapshot(&proc));
            }
            check_invariants(&proc);
            prop_assert!(!proc.is_killed());
        }
    }

    #[test]
    fn non_fixed_placement_is_lowest_gap_first(
        lens in prop::collection::vec(1usize..6, 2..6)
    ) {
        let proc = Process::new(Arc::new(Mutex::new(FramePool::new(64)))).unwrap();
        let mut last = None;
        for pages in lens {
            let addr = sys_mmap(
                &proc,
                0,
                (pages * PAGE_SIZE) as i64,
                PROT_READ,
                MAP_ANONYMOUS | MAP_PRIVATE,
                -1,
                0,
            )
            .unwrap() as u64;
            prop_assert!(addr >= MMAP_BASE && addr < MMAP_TOP);
            if let Some(prev) = last {
                prop_assert!(addr > prev, "placement went backwards: {:#x} after {:#x}", addr, prev);
            }
            last = Some(addr);
        }
    }
}
