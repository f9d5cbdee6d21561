//! Compile-time paging parameters.

use crate::swapping::page_replacement;

/// Pages a process may hold in physical frames at once. Also the capacity of
/// the table that tracks pages living in the swap file.
pub const MAX_RESIDENT_PAGES: usize = 16;

/// Pages a paging process may own in total.
pub const MAX_TOTAL_PAGES: usize = 2 * MAX_RESIDENT_PAGES;

/// A guard page followed by one stack page, placed after every loaded image.
pub const USER_STACK_PAGES: usize = 2;

#[cfg(feature = "no_paging")]
pub type SelectedPolicy = page_replacement::NoPaging;

#[cfg(all(feature = "lifo", not(feature = "no_paging")))]
pub type SelectedPolicy = page_replacement::Lifo;

#[cfg(not(any(feature = "lifo", feature = "no_paging")))]
pub type SelectedPolicy = page_replacement::SecondChance;
