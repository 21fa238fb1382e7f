//! Kernel bring-up.
//!
//! Grounded on the reference kernel's `KernelBuilder`/`ThreadBuilder`
//! (`kernel/src/builder.rs`), adapted to this kernel's `RUN`-based spawn
//! instead of a codegen'd task table: each `.thread(...)` call issues a
//! `RUN` request as a service call (there is no current thread yet during
//! boot), the same path a running thread would use to spawn another.
//! Mirrors the original's `kz_start`/`kz_run`.

use abi::{Request, Response, ThreadEntry, ThreadId};

use crate::Kernel;

/// Boot-time entry point. Builds the kernel singleton, spawns the threads
/// the caller describes, then hands control to the `arch` backend's
/// dispatch primitive — never returns.
pub struct KernelBuilder {
    kernel: &'static mut Kernel,
}

impl KernelBuilder {
    /// # Safety
    /// Must be called at most once: it initializes the arch backend's
    /// kernel singleton, and a second call would alias it.
    pub unsafe fn new() -> Self {
        KernelBuilder {
            kernel: unsafe { crate::arch::init_kernel() },
        }
    }

    /// Spawns a thread at the given priority. Panics if the thread table or
    /// stack arena is exhausted — a build-time configuration error, not a
    /// runtime condition a booting system can recover from.
    pub fn thread(&mut self, thread: ThreadBuilder) -> ThreadId {
        let response = self
            .kernel
            .service_call(Request::Run {
                entry: thread.entry,
                name: thread.name,
                priority: thread.priority,
                stack_size: thread.stack_size,
                argc: thread.argc,
                argv: thread.argv,
            })
            .expect("boot-time RUN can't hit a system-down condition");
        match response {
            Response::Run(Ok(id)) => id,
            Response::Run(Err(())) => panic!("thread table or stack arena exhausted at boot"),
            _ => unreachable!("RUN always yields Response::Run"),
        }
    }

    /// Spawns the idle thread at the lowest priority. The idle thread is
    /// what actually runs when every other thread is blocked; without one,
    /// an otherwise-idle system hits `system error!` the moment its last
    /// real thread blocks.
    pub fn idle_thread(&mut self, thread: ThreadBuilder) -> ThreadId {
        self.thread(ThreadBuilder {
            priority: abi::PRIORITY_NUM - 1,
            ..thread
        })
    }

    /// Picks the first thread to run and hands off to the arch backend.
    /// Never returns.
    pub fn start(self) -> ! {
        self.kernel
            .schedule()
            .expect("at least one thread must be spawned before starting");
        let tcb = self
            .kernel
            .current_tcb()
            .expect("schedule always selects a thread once one exists");
        crate::arch::start_root_task(tcb)
    }
}

/// Describes a thread to spawn. Priority defaults to the lowest
/// non-idle-reserved level; callers doing anything latency-sensitive
/// should set it explicitly.
pub struct ThreadBuilder {
    entry: ThreadEntry,
    name: &'static str,
    priority: usize,
    stack_size: usize,
    argc: isize,
    argv: *const *const u8,
}

impl ThreadBuilder {
    pub fn new(entry: ThreadEntry, name: &'static str) -> Self {
        ThreadBuilder {
            entry,
            name,
            priority: abi::PRIORITY_NUM / 2,
            stack_size: 2048,
            argc: 0,
            argv: core::ptr::null(),
        }
    }

    pub fn priority(mut self, priority: usize) -> Self {
        assert!(priority < abi::PRIORITY_NUM, "priority out of range");
        self.priority = priority;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn args(mut self, argc: isize, argv: *const *const u8) -> Self {
        self.argc = argc;
        self.argv = argv;
        self
    }
}
