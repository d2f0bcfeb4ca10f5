//! Simulated user-mode memory access
//!
//! The hosted stand-in for the MMU: an access walks the process's page
//! tables, and a missing or under-privileged entry raises a page fault
//! through the trap dispatcher, then the access retries — the same
//! fault/retry loop hardware performs around a faulting instruction. A
//! fault the resolver cannot repair leaves the process killed and the
//! access returns [`KernelError::ProcessKilled`].
//!
//! Tests drive the end-to-end scenarios through these functions; nothing
//! here mutates regions or page tables directly.

use crate::error::KernelError;
use crate::mm::page_fault::{AccessKind, PageFaultInfo};
use crate::mm::{FrameNumber, VirtualAddress, PAGE_SIZE};
use crate::process::Process;
use crate::trap::{self, Trap, TrapOutcome};

/// A lazy fill may be followed by a copy-on-write fault for the same
/// access; a third fault means the access can never succeed.
const MAX_FAULTS_PER_ACCESS: usize = 2;

/// Resolve `va` to its backing frame, faulting as needed.
fn resolve(
    process: &Process,
    va: VirtualAddress,
    access: AccessKind,
) -> Result<FrameNumber, KernelError> {
    for _ in 0..=MAX_FAULTS_PER_ACCESS {
        {
            let space = process.space.lock();
            let pool = process.pool().lock();
            if let Some(entry) = space.entry(&pool, va) {
                let allowed = entry.is_present()
                    && entry.is_user()
                    && (access == AccessKind::Read || entry.is_writable());
                if allowed {
                    return entry.frame().ok_or(KernelError::InvalidAddress {
                        addr: va.as_u64(),
                    });
                }
            }
        }

        if process.is_killed() {
            return Err(KernelError::ProcessKilled);
        }
        let outcome = trap::handle_trap(
            process,
            Trap::PageFault(PageFaultInfo {
                address: va,
                access,
                from_user: true,
            }),
        );
        if outcome == TrapOutcome::Terminated {
            return Err(KernelError::ProcessKilled);
        }
    }
    Err(KernelError::ProcessKilled)
}

/// Read `buf.len()` bytes of user memory starting at `va`.
pub fn read_bytes(
    process: &Process,
    va: VirtualAddress,
    buf: &mut [u8],
) -> Result<(), KernelError> {
    let mut done = 0;
    while done < buf.len() {
        let cursor = va.add(done);
        let chunk = (PAGE_SIZE - cursor.page_offset()).min(buf.len() - done);
        let frame = resolve(process, cursor, AccessKind::Read)?;

        let pool = process.pool().lock();
        let offset = cursor.page_offset();
        buf[done..done + chunk].copy_from_slice(&pool.frame(frame)[offset..offset + chunk]);
        done += chunk;
    }
    Ok(())
}

/// Write `buf` into user memory starting at `va`.
pub fn write_bytes(process: &Process, va: VirtualAddress, buf: &[u8]) -> Result<(), KernelError> {
    let mut done = 0;
    while done < buf.len() {
        let cursor = va.add(done);
        let chunk = (PAGE_SIZE - cursor.page_offset()).min(buf.len() - done);
        let frame = resolve(process, cursor, AccessKind::Write)?;

        let mut pool = process.pool().lock();
        let offset = cursor.page_offset();
        pool.frame_mut(frame)[offset..offset + chunk].copy_from_slice(&buf[done..done + chunk]);
        done += chunk;
    }
    Ok(())
}

/// Read one byte of user memory.
pub fn read_byte(process: &Process, va: VirtualAddress) -> Result<u8, KernelError> {
    let mut buf = [0u8; 1];
    read_bytes(process, va, &mut buf)?;
    Ok(buf[0])
}

/// Write one byte of user memory.
pub fn write_byte(process: &Process, va: VirtualAddress, value: u8) -> Result<(), KernelError> {
    write_bytes(process, va, &[value])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::region::Backing;
    use crate::mm::vas::MmapRequest;
    use crate::mm::{FramePool, MapFlags, Protection};
    use crate::process::Process;
    use alloc::sync::Arc;
    use spin::Mutex;

    fn process() -> Process {
        Process::new(Arc::new(Mutex::new(FramePool::new(128)))).unwrap()
    }

    fn map_anon(process: &Process, length: usize, prot: Protection) -> VirtualAddress {
        process
            .space
            .lock()
            .mmap(MmapRequest {
                addr: VirtualAddress::new(0),
                length,
                prot,
                flags: MapFlags::PRIVATE | MapFlags::ANONYMOUS,
                backing: Backing::Anonymous,
            })
            .unwrap()
    }

    #[test]
    fn test_write_then_read_across_page_boundary() {
        let proc = process();
        let a = map_anon(&proc, 2 * PAGE_SIZE, Protection::READ | Protection::WRITE);

        let span = a.add(PAGE_SIZE - 2);
        write_bytes(&proc, span, &[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 4];
        read_bytes(&proc, span, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        // Both pages were faulted in by the straddling write.
        let space = proc.space.lock();
        let pool = proc.pool().lock();
        assert!(space.translate(&pool, a).is_some());
        assert!(space.translate(&pool, a.add(PAGE_SIZE)).is_some());
    }

    #[test]
    fn test_read_of_unmapped_address_kills() {
        let proc = process();
        let err = read_byte(&proc, VirtualAddress::new(0x1000_0000)).unwrap_err();
        assert_eq!(err, KernelError::ProcessKilled);
        assert!(proc.is_killed());
    }

    #[test]
    fn test_write_to_read_only_region_kills() {
        let proc = process();
        let a = map_anon(&proc, PAGE_SIZE, Protection::READ);

        // Reads work (lazy fill)...
        assert_eq!(read_byte(&proc, a).unwrap(), 0);
        // ...but the write faults twice and dies on the permission check.
        let err = write_byte(&proc, a, 1).unwrap_err();
        assert_eq!(err, KernelError::ProcessKilled);
        assert!(proc.is_killed());
    }

    #[test]
    fn test_access_after_kill_fails_fast() {
        let proc = process();
        let a = map_anon(&proc, PAGE_SIZE, Protection::READ | Protection::WRITE);
        write_byte(&proc, a, 9).unwrap();
        proc.kill();
        // Already-mapped pages still translate; the MMU does not consult
        // the killed flag. But a faulting access must not resurrect it.
        assert_eq!(read_byte(&proc, a).unwrap(), 9);
        assert_eq!(
            read_byte(&proc, a.add(PAGE_SIZE)).unwrap_err(),
            KernelError::ProcessKilled
        );
    }
}
