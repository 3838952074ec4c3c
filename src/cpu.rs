//! Register snapshots and frame-pointer stack walks for the diagnostic commands.

use core::arch::asm;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use x86_64::registers::rflags::{self, RFlags};
use x86_64::registers::segmentation::{Segment, CS, DS, ES, FS, GS, SS};

/// Highest stack address a walk may read; 0 until [`mark_stack_top`] runs.
static STACK_TOP: AtomicU64 = AtomicU64::new(0);

const FLAG_NAMES: [(RFlags, &str); 12] = [
    (RFlags::CARRY_FLAG, "CF"),
    (RFlags::PARITY_FLAG, "PF"),
    (RFlags::AUXILIARY_CARRY_FLAG, "AF"),
    (RFlags::ZERO_FLAG, "ZF"),
    (RFlags::SIGN_FLAG, "SF"),
    (RFlags::TRAP_FLAG, "TF"),
    (RFlags::INTERRUPT_FLAG, "IF"),
    (RFlags::DIRECTION_FLAG, "DF"),
    (RFlags::OVERFLOW_FLAG, "OF"),
    (RFlags::NESTED_TASK, "NT"),
    (RFlags::RESUME_FLAG, "RF"),
    (RFlags::VIRTUAL_8086_MODE, "VM"),
];

#[inline(always)]
fn stack_pointer() -> u64 {
    let rsp: u64;
    unsafe { asm!("mov {}, rsp", out(reg) rsp, options(nomem, nostack, preserves_flags)) };
    rsp
}

#[inline(always)]
fn frame_pointer() -> u64 {
    let rbp: u64;
    unsafe { asm!("mov {}, rbp", out(reg) rbp, options(nomem, nostack, preserves_flags)) };
    rbp
}

/// Records the current stack pointer as the top of the kernel stack.
/// Call once, first thing in the entry point.
pub fn mark_stack_top() {
    STACK_TOP.store(stack_pointer(), Ordering::Relaxed);
}

fn stack_top() -> Option<u64> {
    match STACK_TOP.load(Ordering::Relaxed) {
        0 => None,
        top => Some(top),
    }
}

/// Registers readable without privilege, captured in one go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub rsp: u64,
    pub rbp: u64,
    pub rflags: u64,
    pub cs: u16,
    pub ds: u16,
    pub es: u16,
    pub fs: u16,
    pub gs: u16,
    pub ss: u16,
}

impl Registers {
    pub fn capture() -> Self {
        Registers {
            rsp: stack_pointer(),
            rbp: frame_pointer(),
            rflags: rflags::read_raw(),
            cs: CS::get_reg().0,
            ds: DS::get_reg().0,
            es: ES::get_reg().0,
            fs: FS::get_reg().0,
            gs: GS::get_reg().0,
            ss: SS::get_reg().0,
        }
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RSP: {:#018x}  RBP: {:#018x}", self.rsp, self.rbp)?;

        write!(f, "RFLAGS: {:#x} [", self.rflags)?;
        let flags = RFlags::from_bits_truncate(self.rflags);
        for (flag, name) in FLAG_NAMES {
            if flags.contains(flag) {
                write!(f, "{} ", name)?;
            }
        }
        writeln!(f, "IOPL={}]", (self.rflags >> 12) & 0x03)?;

        writeln!(f, "CS: {:#06x}  DS: {:#06x}  ES: {:#06x}", self.cs, self.ds, self.es)?;
        writeln!(f, "FS: {:#06x}  GS: {:#06x}  SS: {:#06x}", self.fs, self.gs, self.ss)
    }
}

/// One saved frame: where it lives and where it returns to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Frame {
    pub rbp: u64,
    pub return_address: u64,
}

/// Follows the saved-`rbp` chain starting at `rbp`, reading words through
/// `read`. Stops at the first pointer outside `[floor, ceiling)`, a misaligned
/// one, or one that does not move towards `ceiling`. Returns how many entries
/// of `out` were filled.
pub fn walk_frames<R: FnMut(u64) -> u64>(
    mut rbp: u64,
    floor: u64,
    ceiling: u64,
    mut read: R,
    out: &mut [Frame],
) -> usize {
    let mut count = 0;
    while count < out.len() {
        if rbp < floor || rbp % 8 != 0 || rbp.saturating_add(16) > ceiling {
            break;
        }
        let next = read(rbp);
        out[count] = Frame {
            rbp,
            return_address: read(rbp + 8),
        };
        count += 1;
        if next <= rbp {
            break;
        }
        rbp = next;
    }
    count
}

fn read_stack_word(address: u64) -> u64 {
    // callers only pass addresses between the live rsp and the marked stack top
    unsafe { core::ptr::read_volatile(address as *const u64) }
}

/// Frames of the current call chain. Empty until the stack top is marked.
pub fn backtrace(out: &mut [Frame]) -> usize {
    let Some(top) = stack_top() else {
        return 0;
    };
    let floor = stack_pointer();
    walk_frames(frame_pointer(), floor, top, read_stack_word, out)
}

/// Copies words upwards from the current stack pointer, never past the stack
/// top. Returns the address of the first word and how many were copied.
pub fn stack_words(out: &mut [u64]) -> (u64, usize) {
    let rsp = stack_pointer();
    let Some(top) = stack_top() else {
        return (rsp, 0);
    };
    let available = (top.saturating_sub(rsp) / 8) as usize;
    let count = out.len().min(available);
    for (i, word) in out[..count].iter_mut().enumerate() {
        *word = read_stack_word(rsp + 8 * i as u64);
    }
    (rsp, count)
}
