//! riscv64 trap entry and context switch.
//!
//! The naked trap trampoline and register-save layout are architecture
//! mechanics independent of what the kernel does with a decoded syscall;
//! they're carried over essentially unchanged. What happens between the
//! register save and the `mret` — building a [`abi::Request`] from the
//! trapped thread's registers and dispatching it — is new.

use core::arch::asm;
use core::mem::{self, MaybeUninit};
use core::sync::atomic::{AtomicBool, Ordering};

use riscv::register::mcause::{Exception, Trap};
use riscv::register::mstatus::MPP;

use abi::{SyscallArgs, SyscallTag};

use crate::tcb::Tcb;
use crate::Kernel;

static KERNEL_INIT: AtomicBool = AtomicBool::new(false);
static mut KERNEL: MaybeUninit<Kernel> = MaybeUninit::uninit();

pub(crate) fn start_root_task(tcb: &Tcb) -> ! {
    unsafe { set_current_tcb(tcb) };
    unsafe { riscv::register::mstatus::set_mpp(MPP::User) };
    unsafe { mask_for_priority(tcb.priority()) };
    unsafe {
        asm!(
            "
            csrrw a0, mscratch, a0
            sd sp, 32*8(a0)
            csrrw a0, mscratch, a0
            ld sp, ({sp})
            mret
            ",
            sp = in(reg) &tcb.saved_state.sp,
            options(noreturn)
        )
    };
}

/// Writes the initial register frame a freshly `RUN` thread resumes into:
/// stack pointer at the top of its carved stack, program counter at its
/// entry point, `argc`/`argv` preloaded into `a0`/`a1` per the riscv calling
/// convention, and `ra` pointed at a trampoline that issues `EXIT` should
/// the entry function ever return — matching the original's thread
/// startup stub, which calls `kz_exit()` itself once `thpp->init.func`
/// returns.
pub(crate) fn init_tcb_stack(tcb: &mut Tcb) {
    let top = tcb.stack_base + tcb.stack_size;
    tcb.saved_sp = top;
    tcb.saved_state.sp = top as u64;
    let init = tcb.init.as_ref();
    tcb.saved_state.pc = init.map(|init| init.entry as usize as u64).unwrap_or(0);
    tcb.saved_state.a0 = init.map(|init| init.argc as u64).unwrap_or(0);
    tcb.saved_state.a1 = init.map(|init| init.argv as usize as u64).unwrap_or(0);
    tcb.saved_state.ra = thread_exit_trampoline as usize as u64;
}

/// Sets `mstatus.MPIE` so that the next `mret` leaves global interrupts
/// masked for a priority-0 thread and unmasked for every other priority,
/// per the thread table's "priority 0 means interrupt-disabled" contract.
unsafe fn mask_for_priority(priority: usize) {
    if priority == 0 {
        riscv::register::mstatus::clear_mpie();
    } else {
        riscv::register::mstatus::set_mpie();
    }
}

/// Reached only if a thread's entry function returns instead of calling
/// `kz_exit` itself.
#[naked]
unsafe extern "C" fn thread_exit_trampoline() -> ! {
    asm!(
        "
        li a7, {exit_tag}
        ecall
        1:
        wfi
        j 1b
        ",
        exit_tag = const SyscallTag::Exit as usize,
        options(noreturn)
    )
}

pub(crate) unsafe fn init_kernel() -> &'static mut Kernel {
    unsafe {
        if KERNEL_INIT.load(Ordering::SeqCst) {
            panic!("kernel already initialized");
        }
        let kernel = KERNEL.write(Kernel::new());
        KERNEL_INIT.store(true, Ordering::SeqCst);
        kernel
    }
}

#[inline]
unsafe fn kernel() -> *mut Kernel {
    KERNEL.as_mut_ptr()
}

pub fn log(bytes: &[u8]) {
    extern "Rust" {
        fn board_log(bytes: &[u8]);
    }
    unsafe { board_log(bytes) };
}

#[derive(Default)]
#[repr(C)]
pub struct SavedThreadState {
    ra: u64,
    sp: u64,
    gp: u64,
    tp: u64,
    t0: u64,
    t1: u64,
    t2: u64,
    s0: u64,
    s1: u64,
    a0: u64,
    a1: u64,
    a2: u64,
    a3: u64,
    a4: u64,
    a5: u64,
    a6: u64,
    a7: u64,
    s2: u64,
    s3: u64,
    s4: u64,
    s5: u64,
    s6: u64,
    s7: u64,
    s8: u64,
    s9: u64,
    s10: u64,
    s11: u64,
    t3: u64,
    t4: u64,
    t5: u64,
    t6: u64,
    pc: u64,
    mpc: u64,
}

impl SavedThreadState {
    fn tag(&self) -> Option<SyscallTag> {
        // a7 carries the syscall tag, matching the riscv convention the
        // userspace wrappers issue `ecall` under.
        match self.a7 {
            0 => Some(SyscallTag::Run),
            1 => Some(SyscallTag::Exit),
            2 => Some(SyscallTag::Wait),
            3 => Some(SyscallTag::Sleep),
            4 => Some(SyscallTag::Wakeup),
            5 => Some(SyscallTag::GetId),
            6 => Some(SyscallTag::ChangePriority),
            7 => Some(SyscallTag::KMalloc),
            8 => Some(SyscallTag::KMFree),
            9 => Some(SyscallTag::Send),
            10 => Some(SyscallTag::Recv),
            11 => Some(SyscallTag::SetIntr),
            _ => None,
        }
    }

    fn args(&self) -> SyscallArgs {
        SyscallArgs {
            arg1: self.a0 as usize,
            arg2: self.a1 as usize,
            arg3: self.a2 as usize,
            arg4: self.a3 as usize,
            arg5: self.a4 as usize,
            arg6: self.a5 as usize,
        }
    }

    pub fn set_syscall_return(&mut self, response: &abi::Response) {
        self.a0 = crate::syscall::encode_response(response);
    }
}

unsafe fn set_current_tcb(tcb: &Tcb) {
    riscv::register::mscratch::write((tcb as *const Tcb).addr());
}

unsafe fn get_current_tcb() -> &'static mut Tcb {
    &mut *(riscv::register::mscratch::read() as *mut Tcb)
}

unsafe fn trap_handler() {
    let cause = riscv::register::mcause::read();
    let kernel = &mut *kernel();
    match cause.cause() {
        Trap::Exception(Exception::UserEnvCall) => {
            let tcb = get_current_tcb();
            let args = tcb.saved_state().args();
            let Some(tag) = tcb.saved_state().tag() else {
                return;
            };
            tcb.saved_state_mut().pc += 4;
            tcb.saved_sp = tcb.saved_state.sp as usize;
            let request = crate::syscall::decode_request(tag, args);
            match kernel.syscall(request) {
                Ok(response) => {
                    let caller = get_current_tcb();
                    caller.saved_state_mut().set_syscall_return(&response);
                }
                Err(_system_down) => halt_forever(),
            }
        }
        _ => {}
    }
    if kernel.schedule().is_err() {
        halt_forever();
    }
    let next = kernel.current_tcb().expect("schedule always selects a thread");
    mask_for_priority(next.priority());
    set_current_tcb(next);
}

fn halt_forever() -> ! {
    defmt::error!("system error!");
    loop {
        unsafe { asm!("wfi") };
    }
}

#[no_mangle]
#[export_name = "_start_trap"]
#[naked]
unsafe extern "C" fn _start_trap() -> ! {
    asm!(
        "
         .align 4
         csrrw a0, mscratch, a0
         sd ra,   0*8(a0)
         sd sp,   1*8(a0)
         sd gp,   2*8(a0)
         sd tp,   3*8(a0)
         sd t0,   4*8(a0)
         sd t1,   5*8(a0)
         sd t2,   6*8(a0)
         sd s0,   7*8(a0)
         sd s1,   8*8(a0)
         sd a1,  10*8(a0)
         sd a2,  11*8(a0)
         sd a3,  12*8(a0)
         sd a4,  13*8(a0)
         sd a5,  14*8(a0)
         sd a6,  15*8(a0)
         sd a7,  16*8(a0)
         sd s2,  17*8(a0)
         sd s3,  18*8(a0)
         sd s4,  19*8(a0)
         sd s5,  20*8(a0)
         sd s6,  21*8(a0)
         sd s7,  22*8(a0)
         sd s8,  23*8(a0)
         sd s9,  24*8(a0)
         sd s10, 25*8(a0)
         sd s11, 26*8(a0)
         sd t3,  27*8(a0)
         sd t4,  28*8(a0)
         sd t5,  29*8(a0)
         sd t6,  30*8(a0)

         csrr a1, mepc
         sd a1,  31*8(a0)

         csrr a1, mscratch
         sd a1, 9*8(a0)

         ld sp, 32*8(a0)
         csrrw a0, mscratch, a0

         jal {trap_handler}

         csrrw t6, mscratch, t6
         ld t5,  31*8(t6)
         csrw mepc, t5

         ld ra,   0*8(t6)
         ld gp,   2*8(t6)
         ld tp,   3*8(t6)
         ld t0,   4*8(t6)
         ld t1,   5*8(t6)
         ld t2,   6*8(t6)
         ld s0,   7*8(t6)
         ld s1,   8*8(t6)
         ld a0,   9*8(t6)
         ld a1,  10*8(t6)
         ld a2,  11*8(t6)
         ld a3,  12*8(t6)
         ld a4,  13*8(t6)
         ld a5,  14*8(t6)
         ld a6,  15*8(t6)
         ld a7,  16*8(t6)
         ld s2,  17*8(t6)
         ld s3,  18*8(t6)
         ld s4,  19*8(t6)
         ld s5,  20*8(t6)
         ld s6,  21*8(t6)
         ld s7,  22*8(t6)
         ld s8,  23*8(t6)
         ld s9,  24*8(t6)
         ld s10, 25*8(t6)
         ld s11, 26*8(t6)
         ld t3,  27*8(t6)
         ld t4,  28*8(t6)
         ld t5,  29*8(t6)
         sd sp,  32*8(t6)
         ld sp,   1*8(t6)

         csrrw t6, mscratch, t6
         csrrw t5, mscratch, t5
         ld t6,  30*8(t5)
         csrrw t5, mscratch, t5

         mret
         ",
        trap_handler = sym trap_handler,
        options(noreturn)
    )
}
