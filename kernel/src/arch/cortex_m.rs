//! Cortex-M `SVCall`-based trap entry.
//!
//! Mirrors the reference `cortex_m` backend: the initial jump into a
//! thread goes through `svc #0xFF` so the privilege drop happens in
//! Handler mode, and every subsequent syscall traps through the same
//! `SVCall` exception.

use core::arch::asm;
use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use abi::{Response, SyscallArgs, SyscallTag};

use crate::tcb::Tcb;
use crate::Kernel;

const INITIAL_PSR: u32 = 1 << 24;
const EXC_RETURN: u32 = 0xFFFF_FFED;

static mut KERNEL: MaybeUninit<Kernel> = MaybeUninit::uninit();
static CURRENT_TCB: AtomicPtr<Tcb> = AtomicPtr::new(ptr::null_mut());

pub(crate) unsafe fn init_kernel() -> &'static mut Kernel {
    KERNEL.write(Kernel::new())
}

#[inline]
unsafe fn kernel() -> *mut Kernel {
    KERNEL.as_mut_ptr()
}

#[inline]
unsafe fn current_tcb() -> *mut Tcb {
    CURRENT_TCB.load(Ordering::SeqCst)
}

unsafe fn set_current_tcb(tcb: &Tcb) {
    CURRENT_TCB.store(tcb as *const Tcb as *mut Tcb, Ordering::SeqCst);
}

pub(crate) fn start_root_task(tcb: &Tcb) -> ! {
    unsafe {
        set_current_tcb(tcb);
        cortex_m::register::psp::write(tcb.saved_state().frame_ptr as u32);
        mask_for_priority(tcb.priority());
    }
    unsafe { asm!("svc #0xFF", options(noreturn)) }
}

/// Plants the exception frame a freshly `RUN` thread unwinds into on its
/// first `SVCall` return: program counter at the entry point, an
/// `xpsr.T` bit set (Thumb), `r0`/`r1` preloaded with `argc`/`argv` per
/// AAPCS, and the stacked link register pointed at a trampoline that
/// issues `EXIT` should the entry function ever return — matching the
/// original's thread startup stub, which calls `kz_exit()` itself once
/// `thpp->init.func` returns.
pub(crate) fn init_tcb_stack(tcb: &mut Tcb) {
    let top = tcb.stack_base + tcb.stack_size;
    let frame_ptr = (top - core::mem::size_of::<ExceptionFrame>()) as *mut ExceptionFrame;
    let init = tcb.init.as_ref();
    let entry = init.map(|init| init.entry as usize as u32).unwrap_or(0);
    let argc = init.map(|init| init.argc as u32).unwrap_or(0);
    let argv = init.map(|init| init.argv as usize as u32).unwrap_or(0);
    unsafe {
        frame_ptr.write(ExceptionFrame {
            r0: argc,
            r1: argv,
            pc: entry | 1,
            xpsr: INITIAL_PSR,
            lr: (thread_exit_trampoline as usize as u32) | 1,
            ..Default::default()
        });
    }
    tcb.saved_state_mut().frame_ptr = frame_ptr as u32;
    tcb.saved_sp = frame_ptr as usize;
}

/// Masks or unmasks global interrupts for the thread about to run, per the
/// thread table's "priority 0 means interrupt-disabled" contract.
unsafe fn mask_for_priority(priority: usize) {
    if priority == 0 {
        cortex_m::interrupt::disable();
    } else {
        cortex_m::interrupt::enable();
    }
}

/// Reached only if a thread's entry function returns instead of calling
/// `kz_exit` itself.
#[naked]
unsafe extern "C" fn thread_exit_trampoline() -> ! {
    asm!(
        "
        movs r0, {exit_tag}
        svc #0
        1:
        wfe
        b 1b
        ",
        exit_tag = const SyscallTag::Exit as usize,
        options(noreturn)
    )
}

pub fn log(bytes: &[u8]) {
    rtt_target::rprint!("{}", core::str::from_utf8(bytes).unwrap_or("<binary>"));
}

#[derive(Default)]
pub struct SavedThreadState {
    frame_ptr: u32,
}

impl SavedThreadState {
    pub fn set_syscall_return(&mut self, response: &Response) {
        let frame = unsafe { &mut *(self.frame_ptr as *mut ExceptionFrame) };
        frame.r0 = crate::syscall::encode_response(response) as u32;
    }
}

#[repr(C)]
#[derive(Default)]
struct ExceptionFrame {
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

unsafe fn decode_args(frame: &ExceptionFrame) -> (SyscallTag, SyscallArgs) {
    let tag = match frame.r0 {
        0 => SyscallTag::Run,
        1 => SyscallTag::Exit,
        2 => SyscallTag::Wait,
        3 => SyscallTag::Sleep,
        4 => SyscallTag::Wakeup,
        5 => SyscallTag::GetId,
        6 => SyscallTag::ChangePriority,
        7 => SyscallTag::KMalloc,
        8 => SyscallTag::KMFree,
        9 => SyscallTag::Send,
        10 => SyscallTag::Recv,
        _ => SyscallTag::SetIntr,
    };
    (
        tag,
        SyscallArgs {
            arg1: frame.r1 as usize,
            arg2: frame.r2 as usize,
            arg3: frame.r3 as usize,
            arg4: frame.r12 as usize,
            arg5: 0,
            arg6: 0,
        },
    )
}

#[allow(non_snake_case)]
#[naked]
#[no_mangle]
pub unsafe extern "C" fn SVCall() {
    asm!(
        "
        mov r0, lr
        mov r1, #0xFFFFFFF3
        bic r0, r1
        cmp r0, #0x8
        beq 1f
        bl {dispatch}
        1:
        movs r0, #1
        msr CONTROL, r0
        mov lr, {exc_return}
        bx lr
        ",
        dispatch = sym dispatch_svc,
        exc_return = const EXC_RETURN,
        options(noreturn)
    )
}

unsafe extern "C" fn dispatch_svc() {
    let caller = &mut *current_tcb();
    let frame = &mut *(caller.saved_state().frame_ptr as *mut ExceptionFrame);
    let (tag, args) = decode_args(frame);
    let request = crate::syscall::decode_request(tag, args);
    let kernel = &mut *kernel();
    match kernel.syscall(request) {
        Ok(response) => caller.saved_state_mut().set_syscall_return(&response),
        Err(_system_down) => halt_forever(),
    }
    if kernel.schedule().is_err() {
        halt_forever();
    }
    let next = kernel.current_tcb().expect("schedule always selects a thread");
    mask_for_priority(next.priority());
    set_current_tcb(next);
    cortex_m::register::psp::write(next.saved_state().frame_ptr);
}

fn halt_forever() -> ! {
    defmt::error!("system error!");
    loop {
        cortex_m::asm::wfi();
    }
}
