//! Utility macros.

use core::fmt;

/// Prints to the kernel console (UART0).
///
/// Equivalent to the [`kprintln!`] macro except that a newline is not printed
/// at the end of the message.
#[macro_export]
macro_rules! kprint {
    () => ($crate::macros::_print_timestamp());
    ($($arg:tt)*) => ({
        $crate::macros::_print_timestamp();
        $crate::macros::_print(format_args!($($arg)*));
    });
}

/// Prints to the kernel console (UART0) with a newline (`\n`).
#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)+) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}

#[doc(hidden)]
pub(crate) fn _print(args: fmt::Arguments) {
    crate::console::_print(args);
}

#[doc(hidden)]
pub(crate) fn _print_timestamp() {
    use crate::arch::riscv::time;
    use crate::config::TIMER_FREQ;

    let ticks = time::ticks();
    let sec = ticks / TIMER_FREQ;
    let subsec = (ticks % TIMER_FREQ) / 10;

    _print(format_args!("[{sec:5}.{subsec:06}] "));
}
