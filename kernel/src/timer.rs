//! Timer-driven sleeps.
//!
//! Sleeping threads park on per-alarm conditions; a single list sorted by
//! wake tick decides what the hardware compare register is armed to. The
//! timer interrupt drains every due alarm and re-arms for the next one, or
//! disables itself when nothing is left to wake.

#![allow(unused)]

use alloc::vec::Vec;

use spin::Mutex;

use riscv::registers::{SiFlags, Sie};

use crate::arch::riscv::irq::IrqGuard;
use crate::arch::riscv::time;
use crate::config::TIMER_FREQ;
use crate::thread::Condition;

/// Sleep queue ordered by ascending wake tick. The head's wake tick is what
/// the compare register is armed to whenever the queue is nonempty.
static SLEEP_QUEUE: Mutex<Vec<SleepEntry>> = Mutex::new(Vec::new());

struct SleepEntry {
    twake: u64,
    cond: Condition,
}

/// Parks the timer until the first sleeper arrives.
pub fn init() {
    set_compare(u64::MAX);
}

/// A resettable deadline for putting threads to sleep.
///
/// Consecutive sleeps advance the wake time relative to the previous one, so
/// a periodic sleeper does not accumulate drift.
pub struct Alarm {
    cond: Condition,
    twake: u64,
}

impl Alarm {
    /// Creates an alarm whose baseline is the current time.
    pub fn new(name: &'static str) -> Self {
        Self {
            cond: Condition::new(name),
            twake: time::ticks(),
        }
    }

    /// Makes the next sleep relative to the time of this call.
    pub fn reset(&mut self) {
        self.twake = time::ticks();
    }

    /// Sleeps until `ticks` past the previous wake time, saturating on
    /// overflow. Returns immediately if that moment has already passed.
    pub fn sleep(&mut self, ticks: u64) {
        let now = time::ticks();

        self.twake = self.twake.saturating_add(ticks);

        if self.twake < now {
            return;
        }

        let guard = IrqGuard::new();

        {
            let mut queue = SLEEP_QUEUE.lock();

            // Insert after any entry with the same wake tick.
            let at = queue.partition_point(|e| e.twake <= self.twake);
            queue.insert(
                at,
                SleepEntry {
                    twake: self.twake,
                    cond: self.cond.clone(),
                },
            );

            // A new earliest wake time must reach the hardware.
            if at == 0 {
                set_compare(self.twake);
            }
        }

        Sie::set(SiFlags::STIE);

        while time::ticks() < self.twake {
            self.cond.wait();
        }

        drop(guard);
    }

    /// Sleeps for a number of seconds.
    pub fn sleep_sec(&mut self, sec: u64) {
        self.sleep(sec * TIMER_FREQ);
    }

    /// Sleeps for a number of milliseconds.
    pub fn sleep_ms(&mut self, ms: u64) {
        self.sleep(ms * (TIMER_FREQ / 1000));
    }

    /// Sleeps for a number of microseconds.
    pub fn sleep_us(&mut self, us: u64) {
        self.sleep(us * (TIMER_FREQ / 1_000_000));
    }
}

/// Puts the calling thread to sleep for a number of milliseconds.
pub fn sleep_ms(ms: u64) {
    Alarm::new("sleep").sleep_ms(ms);
}

/// Puts the calling thread to sleep for a number of microseconds.
pub fn sleep_us(us: u64) {
    Alarm::new("sleep").sleep_us(us);
}

/// Wakes every alarm whose deadline has passed, then re-arms the compare
/// register for the new queue head, or quiesces the timer if the queue is
/// empty. Runs in interrupt context.
pub fn handle_timer_interrupt() {
    let mut now = time::ticks();
    let mut queue = SLEEP_QUEUE.lock();

    while queue.first().map_or(false, |e| e.twake <= now) {
        let entry = queue.remove(0);
        entry.cond.broadcast();
        now = time::ticks();
    }

    match queue.first() {
        Some(head) => {
            set_compare(head.twake);
            Sie::set(SiFlags::STIE);
        }
        None => {
            Sie::clear(SiFlags::STIE);
            set_compare(u64::MAX);
        }
    }
}

fn set_compare(twake: u64) {
    sbi::Timer::set_timer(twake).expect("timer extension unavailable");
}
