//! A ticket-based spinning mutex modelled on [spin](https://docs.rs/spin/latest/spin/).
//!
//! Waiters are served strictly in arrival order, so a process hammering the
//! frame pool cannot starve another one that is trying to fault a page in.

use core::sync::atomic::{AtomicUsize, Ordering};
use core::{
    cell::UnsafeCell,
    fmt,
    ops::{Deref, DerefMut},
};

pub struct TicketMutex<T: ?Sized> {
    next_ticket: AtomicUsize,
    now_serving: AtomicUsize,
    data: UnsafeCell<T>,
}

/// Access to the data behind a [`TicketMutex`]. Dropping it hands the lock to
/// the next ticket in line.
pub struct TicketMutexGuard<'a, T: ?Sized + 'a> {
    now_serving: &'a AtomicUsize,
    ticket: usize,
    data: &'a mut T,
}

// Same unsafe impls as `std::sync::Mutex`
unsafe impl<T: ?Sized + Send> Sync for TicketMutex<T> {}
unsafe impl<T: ?Sized + Send> Send for TicketMutex<T> {}

unsafe impl<T: ?Sized + Sync> Sync for TicketMutexGuard<'_, T> {}

impl<T> TicketMutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            next_ticket: AtomicUsize::new(0),
            now_serving: AtomicUsize::new(0),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> TicketMutex<T> {
    pub fn lock(&self) -> TicketMutexGuard<T> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        while self.now_serving.load(Ordering::Acquire) != ticket {
            core::hint::spin_loop();
        }

        TicketMutexGuard {
            now_serving: &self.now_serving,
            ticket,
            // SAFETY: Only the holder of the current ticket gets here.
            data: unsafe { &mut *self.data.get() },
        }
    }

    pub fn try_lock(&self) -> Option<TicketMutexGuard<T>> {
        let serving = self.now_serving.load(Ordering::Acquire);
        self.next_ticket
            .compare_exchange(serving, serving + 1, Ordering::AcqRel, Ordering::Relaxed)
            .ok()
            .map(|ticket| TicketMutexGuard {
                now_serving: &self.now_serving,
                ticket,
                // SAFETY: The ticket taken above is the one being served.
                data: unsafe { &mut *self.data.get() },
            })
    }

    pub fn is_locked(&self) -> bool {
        self.next_ticket.load(Ordering::Relaxed) != self.now_serving.load(Ordering::Relaxed)
    }
}

impl<T: ?Sized> fmt::Debug for TicketMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketMutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> Deref for TicketMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.data
    }
}

impl<T: ?Sized> DerefMut for TicketMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data
    }
}

impl<T: ?Sized> Drop for TicketMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.now_serving.store(self.ticket + 1, Ordering::Release);
    }
}
