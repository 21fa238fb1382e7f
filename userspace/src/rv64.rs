//! riscv64 `ecall` trampoline. The tag travels in `a7`, arguments in
//! `a0`..`a5`, matching `SavedThreadState::tag`/`args` on the kernel side
//! (`kozos-kernel::arch::rv64`).

use core::arch::asm;

use abi::SyscallArgs;

#[naked]
pub(crate) unsafe extern "C" fn raw_syscall(tag: usize, args: &mut SyscallArgs) -> usize {
    asm!(
        "
        ld t0, 0*8(a1)
        ld t1, 1*8(a1)
        ld t2, 2*8(a1)
        ld t3, 3*8(a1)
        ld t4, 4*8(a1)
        ld t5, 5*8(a1)
        mv t6, a0
        mv a0, t0
        mv a1, t1
        mv a2, t2
        mv a3, t3
        mv a4, t4
        mv a5, t5
        mv a7, t6
        ecall
        ret
        ",
        options(noreturn)
    )
}
