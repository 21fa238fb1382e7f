//! Cortex-M `svc` trampoline. The tag travels in `r0` (untouched across
//! the call), arguments in `r1`..`r3` and `r12`, matching `decode_args` on
//! the kernel side (`kozos-kernel::arch::cortex_m`). Only four argument
//! words fit this way; `kz_run`'s six-word parameter list does not reach
//! the kernel intact over a real trap on this backend — spawning threads
//! past boot should go through a service call instead.

use core::arch::asm;

use abi::SyscallArgs;

#[naked]
pub(crate) unsafe extern "C" fn raw_syscall(tag: usize, args: &mut SyscallArgs) -> usize {
    asm!(
        "
        push {{r4, lr}}
        mov r4, r1
        ldr r1, [r4, #0]
        ldr r2, [r4, #4]
        ldr r3, [r4, #8]
        ldr r12, [r4, #12]
        svc #0
        pop {{r4, pc}}
        ",
        options(noreturn)
    )
}
