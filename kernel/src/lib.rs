//! Demand paging for user address spaces.
//!
//! Every user process keeps at most [`config::MAX_RESIDENT_PAGES`] pages in
//! physical frames. Pages past that are written to a per-process swap file and
//! brought back on a page fault, with the victim chosen by the configured
//! [`swapping::page_replacement`] policy.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod interrupts;
pub mod mem;
pub mod paging;
pub mod swapping;
pub mod sync;
pub mod system;
pub mod threading;
pub mod user_program;

pub use error::{PagingError, Result};
