//! Host-backed test harness. No real trap is ever taken; a "thread" is
//! just a function this module never calls, since `tests.rs` drives the
//! kernel by calling [`crate::Kernel::syscall`]/[`crate::Kernel::service_call`]
//! directly instead of trapping into it.

use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::tcb::Tcb;
use crate::Kernel;

static KERNEL_INIT: AtomicBool = AtomicBool::new(false);
static mut KERNEL: MaybeUninit<Kernel> = MaybeUninit::uninit();

pub(crate) unsafe fn init_kernel() -> &'static mut Kernel {
    if KERNEL_INIT.load(Ordering::SeqCst) {
        panic!("kernel already initialized");
    }
    let kernel = KERNEL.write(Kernel::new());
    KERNEL_INIT.store(true, Ordering::SeqCst);
    kernel
}

pub(crate) fn start_root_task(_tcb: &Tcb) -> ! {
    loop {
        std::thread::sleep(std::time::Duration::from_secs(100));
    }
}

/// Nothing to prime: the dummy backend never actually switches to a raw
/// stack pointer, so there is no initial register frame to write.
pub(crate) fn init_tcb_stack(_tcb: &mut Tcb) {}

pub fn log(bytes: &[u8]) {
    eprint!("{}", String::from_utf8_lossy(bytes));
}

#[derive(Default)]
pub struct SavedThreadState {}

impl SavedThreadState {
    pub fn set_syscall_return(&mut self, _response: &abi::Response) {}
}
