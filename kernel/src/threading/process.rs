use crate::error::{PagingError, Result};
use crate::swapping::{AddressSpace, ImageSegment, PagingContext, PagingReport, Privilege};
use crate::sync::mutex::{Mutex, MutexGuard};
use alloc::{sync::Arc, vec, vec::Vec};
use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use demandpage_shared::{eprintln, println};

pub type Pid = u16;
pub type AtomicPid = AtomicU16;

pub struct Process {
    pub pid: Pid,
    pub ppid: Pid,
    privilege: Privilege,
    space: Mutex<AddressSpace>,
    killed: AtomicBool,
}

impl Process {
    pub fn privilege(&self) -> Privilege {
        self.privilege
    }

    pub fn space(&self) -> MutexGuard<AddressSpace> {
        self.space.lock()
    }

    /// Moves the end of the heap by `delta` bytes and returns where it was.
    pub fn sbrk(&self, delta: isize) -> Result<usize> {
        let mut space = self.space();
        let old_size = space.size();
        if delta > 0 {
            space.grow(delta.unsigned_abs())?;
        } else if delta < 0 {
            space.shrink(delta.unsigned_abs())?;
        }
        Ok(old_size)
    }

    /// Services a page fault raised by this process. A fault that cannot be
    /// served kills the process and nothing else.
    pub fn handle_page_fault(&self, va: usize) -> bool {
        match self.space().handle_fault(va) {
            Ok(()) => true,
            Err(err) => {
                eprintln!("pid {}: page fault at {va:#X}: {err}, killing process", self.pid);
                self.kill();
                false
            }
        }
    }

    pub fn exec<I>(&self, segments: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<ImageSegment>>,
    {
        self.space().replace_image(segments)
    }

    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn report(&self) -> PagingReport {
        self.space().report()
    }
}

/// Every live process, in a fixed number of slots.
pub struct ProcessTable {
    context: PagingContext,
    slots: Mutex<Vec<Option<Arc<Process>>>>,
    next_pid: AtomicPid,
}

impl ProcessTable {
    pub fn new(context: PagingContext, capacity: usize) -> Self {
        Self {
            context,
            slots: Mutex::new(vec![None; capacity]),
            next_pid: AtomicPid::new(1),
        }
    }

    pub fn context(&self) -> &PagingContext {
        &self.context
    }

    /// Hands out the next pid that is neither zero nor held by a live
    /// process. The counter wraps.
    fn allocate_pid(&self) -> Result<Pid> {
        for _ in 0..=Pid::MAX {
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            if pid != 0 && self.get(pid).is_none() {
                return Ok(pid);
            }
        }
        Err(PagingError::NoProcessSlot)
    }

    fn insert(&self, process: Process) -> Result<Arc<Process>> {
        let mut slots = self.slots.lock();
        let slot = slots
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(PagingError::NoProcessSlot)?;
        let process = Arc::new(process);
        *slot = Some(process.clone());
        Ok(process)
    }

    /// Creates a process with an empty address space.
    pub fn spawn(&self, privilege: Privilege, ppid: Pid) -> Result<Arc<Process>> {
        let pid = self.allocate_pid()?;
        let space = AddressSpace::new(&self.context, pid, privilege)?;
        self.insert(Process {
            pid,
            ppid,
            privilege,
            space: Mutex::new(space),
            killed: AtomicBool::new(false),
        })
    }

    /// Creates a child holding a copy of `parent`'s memory. The child has the
    /// parent's privilege.
    pub fn fork(&self, parent: &Process) -> Result<Arc<Process>> {
        let pid = self.allocate_pid()?;
        let mut space = AddressSpace::new(&self.context, pid, parent.privilege)?;
        parent.space().duplicate_into(&mut space)?;
        self.insert(Process {
            pid,
            ppid: parent.pid,
            privilege: parent.privilege,
            space: Mutex::new(space),
            killed: AtomicBool::new(false),
        })
    }

    /// Removes `pid` from the table. Its memory and swap file go away once the
    /// last reference to it is dropped.
    pub fn exit(&self, pid: Pid) -> Option<Arc<Process>> {
        self.slots
            .lock()
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|process| process.pid == pid))
            .and_then(Option::take)
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.slots
            .lock()
            .iter()
            .flatten()
            .find(|process| process.pid == pid)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn processes(&self) -> Vec<Arc<Process>> {
        self.slots.lock().iter().flatten().cloned().collect()
    }

    pub fn reports(&self) -> Vec<PagingReport> {
        self.processes()
            .iter()
            .map(|process| process.report())
            .collect()
    }

    /// Prints a line per process followed by the system-wide frame count.
    pub fn dump(&self) {
        for report in self.reports() {
            println!("{report}");
        }
        let memory = &self.context.memory;
        println!(
            "{} / {} free pages in the system",
            memory.free_frames(),
            memory.total_frames()
        );
    }
}
