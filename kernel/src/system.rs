use crate::swapping::PagingContext;
use crate::threading::process::{AtomicPid, Pid, Process, ProcessTable};
use alloc::{boxed::Box, sync::Arc};
use core::sync::atomic::Ordering;
use once_cell::race::OnceBox;

/// Machine-wide state shared by every processor.
pub struct SystemState {
    pub context: PagingContext,
    pub processes: ProcessTable,
    running: AtomicPid,
}

const NO_PROCESS: Pid = 0;

static SYSTEM: OnceBox<SystemState> = OnceBox::new();

/// Sets up the system state on first call. Later calls return the state
/// that is already there and ignore their arguments.
pub fn init_system(context: PagingContext, max_processes: usize) -> &'static SystemState {
    SYSTEM.get_or_init(|| {
        Box::new(SystemState {
            processes: ProcessTable::new(context.clone(), max_processes),
            context,
            running: AtomicPid::new(NO_PROCESS),
        })
    })
}

pub fn unwrap_system() -> Option<&'static SystemState> {
    SYSTEM.get()
}

impl SystemState {
    /// Switches to `pid`, loading its page directory.
    pub fn set_running(&self, pid: Pid) -> Option<Arc<Process>> {
        let process = self.processes.get(pid)?;
        process.space().activate();
        self.running.store(pid, Ordering::SeqCst);
        Some(process)
    }

    pub fn running_process(&self) -> Option<Arc<Process>> {
        match self.running.load(Ordering::SeqCst) {
            NO_PROCESS => None,
            pid => self.processes.get(pid),
        }
    }
}

/// The process on this processor, if the system is up and one is running.
pub fn running_process() -> Option<Arc<Process>> {
    unwrap_system()?.running_process()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::page_fault::page_fault_handler;
    use crate::mem::PhysicalMemory;
    use crate::swapping::swap_file::TempSwapFs;
    use crate::swapping::Privilege;
    use crate::user_program::syscall::{sys_fork, sys_sbrk, EFAULT};
    use demandpage_shared::mem::{PAGE_FRAME_SIZE, SECTORS_PER_PAGE};

    // The only test that touches the global state.
    #[test]
    fn running_process_drives_traps_and_syscalls() {
        let memory = Arc::new(PhysicalMemory::new(256));
        let swap_fs = Arc::new(TempSwapFs::new(64 * SECTORS_PER_PAGE));
        let system = init_system(PagingContext::new(memory, swap_fs), 8);
        assert!(running_process().is_none());
        assert!(!page_fault_handler(0));
        assert_eq!(sys_sbrk(PAGE_FRAME_SIZE as isize), -EFAULT);

        let init = system.processes.spawn(Privilege::User, 0).unwrap();
        assert!(system.set_running(init.pid).is_some());
        assert!(init.space().is_active());
        assert_eq!(running_process().map(|process| process.pid), Some(init.pid));

        assert_eq!(sys_sbrk(20 * PAGE_FRAME_SIZE as isize), 0);
        #[cfg(not(feature = "no_paging"))]
        {
            let evicted = init.space().evicted().iter().next().unwrap().virtual_page;
            assert!(page_fault_handler(evicted + 12));
            assert!(init.space().resident().find(evicted).is_some());
        }

        let child = sys_fork();
        assert!(child > 0);
        let child = system.processes.get(child as Pid).unwrap();
        assert_eq!(child.ppid, init.pid);

        assert!(!page_fault_handler(100 * PAGE_FRAME_SIZE));
        assert!(init.is_killed());
        assert!(!child.is_killed());
        system.processes.dump();
    }
}
