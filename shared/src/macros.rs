//! Console output.
//!
//! On bare metal everything goes out the first serial port. Hosted builds
//! (unit tests) forward to the process's standard streams instead.

use core::fmt;

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::macros::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };
    ($($arg:tt)*) => {
        $crate::macros::_print(format_args!("{}\n", format_args!($($arg)*)))
    };
}

#[macro_export]
macro_rules! eprint {
    ($($arg:tt)*) => {
        $crate::macros::_eprint(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! eprintln {
    () => {
        $crate::eprint!("\n")
    };
    ($($arg:tt)*) => {
        $crate::macros::_eprint(format_args!("{}\n", format_args!($($arg)*)))
    };
}

#[cfg(target_os = "none")]
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    // SAFETY: Output is only written from one CPU and never from interrupt
    // handlers that could preempt another writer.
    unsafe {
        let writer = &mut *core::ptr::addr_of_mut!(crate::serial::SERIAL_WRITER);
        let _ = writer.write_fmt(args);
    }
}

#[cfg(target_os = "none")]
#[doc(hidden)]
pub fn _eprint(args: fmt::Arguments) {
    _print(args);
}

#[cfg(not(target_os = "none"))]
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    std::print!("{args}");
}

#[cfg(not(target_os = "none"))]
#[doc(hidden)]
pub fn _eprint(args: fmt::Arguments) {
    std::eprint!("{args}");
}
