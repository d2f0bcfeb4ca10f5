//! Trap dispatch
//!
//! The fault vector is the interesting branch: it feeds the resolver in
//! [`crate::mm::page_fault`] and turns unresolvable user faults into a
//! killed process. The remaining branches are the scaffolding the core
//! depends on: the timer advances the global tick counter, and the shared
//! epilogue enforces the contract that a killed process never returns to
//! user mode and that user code preempts on the clock tick.

use log::warn;

use spin::Mutex;

use crate::mm::page_fault::{self, PageFaultInfo};
use crate::process::Process;

/// Global tick counter.
///
/// Lock discipline: the mutex is held only for the single increment or
/// read; no other lock is ever taken while it is held.
static TICKS: Mutex<u64> = Mutex::new(0);

/// Clock ticks since boot.
pub fn ticks() -> u64 {
    *TICKS.lock()
}

/// A trap delivered to the kernel.
#[derive(Debug, Clone, Copy)]
pub enum Trap {
    /// Page fault, with the faulting address and access kind.
    PageFault(PageFaultInfo),
    /// Syscall gate; dispatching the call itself happens in
    /// [`crate::syscall`].
    Syscall,
    /// Clock tick.
    Timer { from_user: bool },
    /// An interrupt vector nothing claims.
    Spurious { vector: u32, from_user: bool },
}

impl Trap {
    /// Was the interrupted context running user code?
    fn from_user(&self) -> bool {
        match self {
            Trap::PageFault(info) => info.from_user,
            Trap::Syscall => true,
            Trap::Timer { from_user } => *from_user,
            Trap::Spurious { from_user, .. } => *from_user,
        }
    }
}

/// What the interrupted context should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    /// Resume the interrupted context.
    Continue,
    /// Give up the CPU before resuming.
    Yield,
    /// The process is dead; the scheduler must tear it down.
    Terminated,
}

/// Dispatch one trap for `process` and run the trap epilogue.
pub fn handle_trap(process: &Process, trap: Trap) -> TrapOutcome {
    match &trap {
        Trap::PageFault(info) => {
            let result = {
                let mut space = process.space.lock();
                let mut pool = process.pool().lock();
                page_fault::handle_page_fault(&mut space, &mut pool, info)
            };
            if let Err(err) = result {
                if info.from_user {
                    warn!(
                        "pid {}: fault at {:#x} kills process: {}",
                        process.pid(),
                        info.address.as_u64(),
                        err
                    );
                    process.kill();
                } else {
                    // A fault the kernel cannot repair in its own context
                    // is a kernel bug, not a process error.
                    panic!(
                        "kernel-mode page fault at {:#x}: {}",
                        info.address.as_u64(),
                        err
                    );
                }
            }
        }
        Trap::Timer { .. } => {
            *TICKS.lock() += 1;
        }
        Trap::Syscall => {}
        Trap::Spurious { vector, from_user } => {
            warn!("spurious interrupt {} (from_user={})", vector, from_user);
        }
    }

    // Epilogue: force a killed process out at this safe point, and force
    // user code to give up the CPU on the clock tick.
    if process.is_killed() && trap.from_user() {
        return TrapOutcome::Terminated;
    }
    if matches!(trap, Trap::Timer { from_user: true }) {
        return TrapOutcome::Yield;
    }
    TrapOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::page_fault::AccessKind;
    use crate::mm::{FramePool, VirtualAddress};
    use crate::process::Process;
    use alloc::sync::Arc;

    fn process() -> Process {
        Process::new(Arc::new(spin::Mutex::new(FramePool::new(64)))).unwrap()
    }

    #[test]
    fn test_timer_advances_ticks_and_yields_user() {
        let proc = process();
        let before = ticks();
        let outcome = handle_trap(&proc, Trap::Timer { from_user: true });
        assert_eq!(outcome, TrapOutcome::Yield);
        assert!(ticks() > before);

        // Kernel-mode ticks do not yield.
        let outcome = handle_trap(&proc, Trap::Timer { from_user: false });
        assert_eq!(outcome, TrapOutcome::Continue);
    }

    #[test]
    fn test_fault_outside_any_region_kills_user_process() {
        let proc = process();
        let info = PageFaultInfo {
            address: VirtualAddress::new(0x1234_5000),
            access: AccessKind::Read,
            from_user: true,
        };
        let outcome = handle_trap(&proc, Trap::PageFault(info));
        assert_eq!(outcome, TrapOutcome::Terminated);
        assert!(proc.is_killed());
    }

    #[test]
    #[should_panic(expected = "kernel-mode page fault")]
    fn test_kernel_mode_fault_panics() {
        let proc = process();
        let info = PageFaultInfo {
            address: VirtualAddress::new(0x1234_5000),
            access: AccessKind::Read,
            from_user: false,
        };
        handle_trap(&proc, Trap::PageFault(info));
    }

    #[test]
    fn test_killed_flag_terminates_at_next_user_trap() {
        let proc = process();
        proc.kill();
        // Kernel context keeps running until the next user-mode boundary.
        assert_eq!(
            handle_trap(&proc, Trap::Timer { from_user: false }),
            TrapOutcome::Continue
        );
        assert_eq!(
            handle_trap(&proc, Trap::Timer { from_user: true }),
            TrapOutcome::Terminated
        );
    }

    #[test]
    fn test_spurious_interrupt_continues() {
        let proc = process();
        let outcome = handle_trap(
            &proc,
            Trap::Spurious {
                vector: 39,
                from_user: false,
            },
        );
        assert_eq!(outcome, TrapOutcome::Continue);
    }
}
