//! Process records
//!
//! The slice of the process abstraction the memory subsystem needs: a pid,
//! the killed flag the fault path sets, the address space, the open-file
//! table, and a handle to the machine's frame pool. Scheduling and the wider
//! lifecycle syscalls live outside this crate's scope; `fork` and `exit`
//! are here because they walk the address space.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use alloc::sync::Arc;

use spin::Mutex;

use crate::error::KernelError;
use crate::fs::FileTable;
use crate::mm::vas::AddressSpace;
use crate::mm::FramePool;

/// Shared handle to the machine's physical memory.
pub type FramePoolHandle = Arc<Mutex<FramePool>>;

static NEXT_PID: AtomicU64 = AtomicU64::new(1);

/// One process.
///
/// Lock ordering: `space` before the frame pool before any inode sleep
/// lock. The killed flag is a plain atomic so the trap epilogue can read it
/// without taking any lock.
pub struct Process {
    pid: u64,
    killed: AtomicBool,
    exited: AtomicBool,
    pool: FramePoolHandle,
    pub space: Mutex<AddressSpace>,
    pub files: Mutex<FileTable>,
}

impl Process {
    /// Create a process with an empty address space on `pool`.
    pub fn new(pool: FramePoolHandle) -> Result<Self, KernelError> {
        let space = {
            let mut pool = pool.lock();
            AddressSpace::new(&mut pool)?
        };
        Ok(Self {
            pid: NEXT_PID.fetch_add(1, Ordering::Relaxed),
            killed: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            pool,
            space: Mutex::new(space),
            files: Mutex::new(FileTable::new()),
        })
    }

    pub fn pid(&self) -> u64 {
        self.pid
    }

    /// Flag the process for termination at the next trap epilogue.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::Release);
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    pub fn pool(&self) -> &FramePoolHandle {
        &self.pool
    }

    /// Duplicate this process.
    ///
    /// The child shares the frame pool and the open files (descriptor table
    /// copied, files reference-shared) and gets a copy of the address space
    /// with copy-on-write armed on writable private pages.
    pub fn fork(&self) -> Result<Process, KernelError> {
        let child_space = {
            let mut space = self.space.lock();
            let mut pool = self.pool.lock();
            space.fork(&mut pool)?
        };
        Ok(Process {
            pid: NEXT_PID.fetch_add(1, Ordering::Relaxed),
            killed: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            pool: Arc::clone(&self.pool),
            space: Mutex::new(child_space),
            files: Mutex::new(self.files.lock().clone()),
        })
    }

    /// Release every resource the process holds. Idempotent; the address
    /// space must not be used afterwards.
    pub fn exit(&self) {
        if self.exited.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut space = self.space.lock();
        let mut pool = self.pool.lock();
        space.teardown(&mut pool);
        *self.files.lock() = FileTable::new();
    }
}
