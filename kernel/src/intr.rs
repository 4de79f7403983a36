//! Interrupt manager.
//!
//! Owns the table associating PLIC source numbers with service routines and
//! drives the claim/complete cycle for external interrupts. Timer interrupts
//! are routed straight to the timer module by the trap handler.

use alloc::boxed::Box;

use spin::Mutex;

use riscv::registers::{SiFlags, Sie};

use crate::arch::riscv::irq::IrqGuard;
use crate::config::PLIC_SRC_COUNT;
use crate::drivers::plic;

/// An interrupt service routine; receives the source number that fired.
pub type Isr = Box<dyn Fn(u32) + Send>;

const NO_ISR: Option<Isr> = None;

static ISR_TABLE: Mutex<[Option<Isr>; PLIC_SRC_COUNT as usize]> =
    Mutex::new([NO_ISR; PLIC_SRC_COUNT as usize]);

/// Initializes the PLIC and unmasks the timer and external interrupt classes.
/// Global interrupt delivery stays off until the boot path enables it.
pub fn init() {
    plic::init();

    Sie::write(SiFlags::SEIE | SiFlags::STIE);
}

/// Routes `srcno` to `isr` at the given priority.
pub fn enable_source(srcno: u32, prio: u32, isr: Isr) {
    assert!(0 < srcno && srcno < PLIC_SRC_COUNT);
    assert!(prio > 0);

    let _guard = IrqGuard::new();
    ISR_TABLE.lock()[srcno as usize] = Some(isr);
    plic::enable_source(srcno, prio);
}

/// Masks `srcno` and forgets its service routine.
pub fn disable_source(srcno: u32) {
    let _guard = IrqGuard::new();
    plic::disable_source(srcno);
    ISR_TABLE.lock()[srcno as usize] = None;
}

/// Claims the pending external interrupt, dispatches its routine, and
/// completes it. Runs in interrupt context.
pub fn handle_external_interrupt() {
    let srcno = plic::claim();

    // A claim of zero means the interrupt was already gone.
    if srcno == 0 {
        return;
    }
    assert!(srcno < PLIC_SRC_COUNT);

    {
        let table = ISR_TABLE.lock();
        match table[srcno as usize] {
            Some(ref isr) => isr(srcno),
            None => panic!("interrupt from source {} with no ISR", srcno),
        }
    }

    plic::complete(srcno);
}
