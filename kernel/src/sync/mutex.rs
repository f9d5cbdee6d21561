pub mod ticket;

pub use self::ticket::{TicketMutex as Mutex, TicketMutexGuard as MutexGuard};
