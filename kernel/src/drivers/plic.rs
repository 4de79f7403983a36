//! SiFive Platform-Level Interrupt Controller (PLIC).
//!
//! Single-hart operation: every source is routed to the S-mode context of
//! hart 0, all other contexts are fully masked.

use crate::config::{PLIC_BASE, PLIC_CTX_COUNT, PLIC_PRIO_MAX, PLIC_SIZE, PLIC_SRC_COUNT};
use crate::mmio::Regmap;

// SAFETY: the range covers the PLIC register block and nothing else.
static PLIC: Regmap = unsafe { Regmap::new(PLIC_BASE, PLIC_SIZE) };

// Context `2*hart` is the hart's M-mode context, `2*hart + 1` its S-mode one.
const CTX_HART0_S: u32 = 1;

// Register block offsets.
const PRIORITY_BASE: usize = 0x0000;
const ENABLE_BASE: usize = 0x2000;
const ENABLE_STRIDE: usize = 0x80;
const CTXCTL_BASE: usize = 0x20_0000;
const CTXCTL_STRIDE: usize = 0x1000;
const CLAIM_OFFSET: usize = 4;

/// Masks every source, then routes them all to hart 0's S-mode context.
/// Individual sources stay dormant until given a nonzero priority.
pub fn init() {
    for src in 0..PLIC_SRC_COUNT {
        set_source_priority(src, 0);
    }

    for ctx in 0..PLIC_CTX_COUNT {
        disable_all_sources_for_context(ctx);
    }

    enable_all_sources_for_context(CTX_HART0_S);
}

/// Unmasks a source by assigning it a nonzero priority.
pub fn enable_source(srcno: u32, prio: u32) {
    assert!(0 < srcno && srcno < PLIC_SRC_COUNT);
    assert!(prio > 0);

    set_source_priority(srcno, prio);
}

/// Masks a source.
pub fn disable_source(srcno: u32) {
    if srcno > 0 {
        set_source_priority(srcno, 0);
    }
}

/// Claims the highest-priority pending interrupt for hart 0's S-mode
/// context; 0 if none is pending.
pub fn claim() -> u32 {
    claim_context_interrupt(CTX_HART0_S)
}

/// Signals completion of a claimed interrupt.
pub fn complete(srcno: u32) {
    complete_context_interrupt(CTX_HART0_S, srcno);
}

fn set_source_priority(srcno: u32, level: u32) {
    assert!(srcno < PLIC_SRC_COUNT);

    PLIC.write(
        PRIORITY_BASE + 4 * srcno as usize,
        level.min(PLIC_PRIO_MAX),
    );
}

fn enable_word(ctxno: u32, word: usize) -> usize {
    ENABLE_BASE + ENABLE_STRIDE * ctxno as usize + 4 * word
}

fn enable_all_sources_for_context(ctxno: u32) {
    assert!(ctxno < PLIC_CTX_COUNT);

    for word in 0..(PLIC_SRC_COUNT as usize).div_ceil(32) {
        PLIC.write(enable_word(ctxno, word), u32::MAX);
    }
}

fn disable_all_sources_for_context(ctxno: u32) {
    assert!(ctxno < PLIC_CTX_COUNT);

    for word in 0..(PLIC_SRC_COUNT as usize).div_ceil(32) {
        PLIC.write(enable_word(ctxno, word), 0u32);
    }
}

fn claim_context_interrupt(ctxno: u32) -> u32 {
    assert!(ctxno < PLIC_CTX_COUNT);

    PLIC.read(CTXCTL_BASE + CTXCTL_STRIDE * ctxno as usize + CLAIM_OFFSET)
}

fn complete_context_interrupt(ctxno: u32, srcno: u32) {
    assert!(ctxno < PLIC_CTX_COUNT);
    assert!(srcno < PLIC_SRC_COUNT);

    PLIC.write(
        CTXCTL_BASE + CTXCTL_STRIDE * ctxno as usize + CLAIM_OFFSET,
        srcno,
    );
}
