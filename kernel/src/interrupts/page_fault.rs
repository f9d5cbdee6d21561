//! Page fault trap entry.

use crate::system::running_process;
use demandpage_shared::eprintln;

/// Called with the faulting address read from CR2. Returns whether the
/// running process may retry the instruction; on `false` it has been killed,
/// or there was no process to blame.
pub fn page_fault_handler(fault_addr: usize) -> bool {
    let Some(process) = running_process() else {
        eprintln!("page fault at {fault_addr:#X} with no running process");
        return false;
    };
    process.handle_page_fault(fault_addr) && !process.is_killed()
}
