//! RISC-V exception handling.

use core::arch::global_asm;

use riscv::registers::Stvec;

// {m,s}cause register flags
const CAUSE_IRQ_FLAG_MASK: usize = 1 << 63;

/// Interrupt cause codes handled by the kernel.
const IRQ_S_TIMER: usize = 5;
const IRQ_S_EXTERNAL: usize = 9;

/// Possible exception causes on a RISC-V CPU.
#[repr(usize)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ExceptionCause {
    InstrAddrMisaligned,
    InstrAccessFault,
    IllegalInstr,
    Breakpoint,
    LoadAddrMisaligned,
    LoadAccessFault,
    StoreAddrMisaligned,
    StoreAccessFault,
    EnvCallFromU,
    EnvCallFromS,
    InstrPageFault,
    LoadPageFault,
    StorePageFault,
}

impl ExceptionCause {
    fn from_code(n: usize) -> Option<Self> {
        use ExceptionCause::*;

        Some(match n {
            0 => InstrAddrMisaligned,
            1 => InstrAccessFault,
            2 => IllegalInstr,
            3 => Breakpoint,
            4 => LoadAddrMisaligned,
            5 => LoadAccessFault,
            6 => StoreAddrMisaligned,
            7 => StoreAccessFault,
            8 => EnvCallFromU,
            9 => EnvCallFromS,
            12 => InstrPageFault,
            13 => LoadPageFault,
            15 => StorePageFault,
            _ => return None,
        })
    }

    /// Whether the fault address in `stval` is meaningful for this cause.
    fn has_fault_address(self) -> bool {
        use ExceptionCause::*;

        matches!(
            self,
            InstrAddrMisaligned
                | InstrAccessFault
                | LoadAddrMisaligned
                | LoadAccessFault
                | StoreAddrMisaligned
                | StoreAccessFault
                | InstrPageFault
                | LoadPageFault
                | StorePageFault
        )
    }
}

/// Information stored by the trap handler.
///
/// Note: the order of the fields in this structure **must** match the order in
/// which registers are pushed to the stack in the handler's trampoline.
#[repr(C)]
struct TrapFrame {
    ra: usize,
    sp: usize,
    gp: usize,
    tp: usize,
    t0: usize,
    t1: usize,
    t2: usize,
    s0: usize,
    s1: usize,
    a0: usize,
    a1: usize,
    a2: usize,
    a3: usize,
    a4: usize,
    a5: usize,
    a6: usize,
    a7: usize,
    s2: usize,
    s3: usize,
    s4: usize,
    s5: usize,
    s6: usize,
    s7: usize,
    s8: usize,
    s9: usize,
    s10: usize,
    s11: usize,
    t3: usize,
    t4: usize,
    t5: usize,
    t6: usize,
}

impl TrapFrame {
    /// Prints the content of the trap frame to the console.
    #[rustfmt::skip]
    fn dump(&self, pc: usize) {
        let s = self;
        kprintln!(" PC was at {:016x}", pc);
        kprintln!(" RA was at {:016x}", s.ra);
        kprintln!(" sp : {:016x}  gp : {:016x}  tp : {:016x}", s.sp, s.gp, s.tp);
        kprintln!(" t0 : {:016x}  t1 : {:016x}  t2 : {:016x}", s.t0, s.t1, s.t2);
        kprintln!(" s0 : {:016x}  s1 : {:016x}  a0 : {:016x}", s.s0, s.s1, s.a0);
        kprintln!(" a1 : {:016x}  a2 : {:016x}  a3 : {:016x}", s.a1, s.a2, s.a3);
        kprintln!(" a4 : {:016x}  a5 : {:016x}  a6 : {:016x}", s.a4, s.a5, s.a6);
        kprintln!(" a7 : {:016x}  s2 : {:016x}  s3 : {:016x}", s.a7, s.s2, s.s3);
        kprintln!(" s4 : {:016x}  s5 : {:016x}  s6 : {:016x}", s.s4, s.s5, s.s6);
        kprintln!(" s7 : {:016x}  s8 : {:016x}  s9 : {:016x}", s.s7, s.s8, s.s9);
        kprintln!(" s10: {:016x}  s11: {:016x}  t3 : {:016x}", s.s10, s.s11, s.t3);
        kprintln!(" t4 : {:016x}  t5 : {:016x}  t6 : {:016x}", s.t4, s.t5, s.t6);
    }
}

// Trap trampoline: spill every general-purpose register, hand cause/epc/tval
// and the frame to `handle_trap`, then resume at whatever epc it returns.
global_asm!(
    r#"
    .align 4
    .globl trap_entry
trap_entry:
    addi sp, sp, -248
    sd ra, 0(sp)
    addi ra, sp, 248
    sd ra, 8(sp)
    sd gp, 16(sp)
    sd tp, 24(sp)
    sd t0, 32(sp)
    sd t1, 40(sp)
    sd t2, 48(sp)
    sd s0, 56(sp)
    sd s1, 64(sp)
    sd a0, 72(sp)
    sd a1, 80(sp)
    sd a2, 88(sp)
    sd a3, 96(sp)
    sd a4, 104(sp)
    sd a5, 112(sp)
    sd a6, 120(sp)
    sd a7, 128(sp)
    sd s2, 136(sp)
    sd s3, 144(sp)
    sd s4, 152(sp)
    sd s5, 160(sp)
    sd s6, 168(sp)
    sd s7, 176(sp)
    sd s8, 184(sp)
    sd s9, 192(sp)
    sd s10, 200(sp)
    sd s11, 208(sp)
    sd t3, 216(sp)
    sd t4, 224(sp)
    sd t5, 232(sp)
    sd t6, 240(sp)

    csrr a0, scause
    csrr a1, sepc
    csrr a2, stval
    mv a3, sp
    call handle_trap
    csrw sepc, a0

    ld ra, 0(sp)
    ld gp, 16(sp)
    ld tp, 24(sp)
    ld t0, 32(sp)
    ld t1, 40(sp)
    ld t2, 48(sp)
    ld s0, 56(sp)
    ld s1, 64(sp)
    ld a0, 72(sp)
    ld a1, 80(sp)
    ld a2, 88(sp)
    ld a3, 96(sp)
    ld a4, 104(sp)
    ld a5, 112(sp)
    ld a6, 120(sp)
    ld a7, 128(sp)
    ld s2, 136(sp)
    ld s3, 144(sp)
    ld s4, 152(sp)
    ld s5, 160(sp)
    ld s6, 168(sp)
    ld s7, 176(sp)
    ld s8, 184(sp)
    ld s9, 192(sp)
    ld s10, 200(sp)
    ld s11, 208(sp)
    ld t3, 216(sp)
    ld t4, 224(sp)
    ld t5, 232(sp)
    ld t6, 240(sp)
    addi sp, sp, 248
    sret
"#
);

#[no_mangle]
extern "C" fn handle_trap(cause: usize, epc: usize, tval: usize, tf: &TrapFrame) -> usize {
    let is_irq = (cause & CAUSE_IRQ_FLAG_MASK) != 0;
    let code = cause & !CAUSE_IRQ_FLAG_MASK;

    if is_irq {
        match code {
            IRQ_S_TIMER => crate::timer::handle_timer_interrupt(),
            IRQ_S_EXTERNAL => crate::intr::handle_external_interrupt(),
            _ => panic!("unexpected interrupt cause {}", code),
        }

        // After an interrupt, continue from where we left off
        return epc;
    }

    // No exception is recoverable at this point: report and halt.
    match ExceptionCause::from_code(code) {
        Some(ex) if ex.has_fault_address() => {
            kprintln!("=> {:?} trying to access {:016x}", ex, tval)
        }
        Some(ex) => kprintln!("=> Unhandled exception: {:?}, tval {:016x}", ex, tval),
        None => kprintln!("=> Unknown exception {}, tval {:016x}", code, tval),
    }

    tf.dump(epc);

    panic!("unhandled S-mode exception");
}

/// Configures the trap vector used to handle traps in S-mode.
pub fn init() {
    extern "C" {
        fn trap_entry();
    }

    // Configure trap vector to point to `trap_entry`
    Stvec::write(trap_entry as usize as u64);
}
