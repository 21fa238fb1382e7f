//! Wires `defmt`'s global logger to whatever byte sink the active `arch`
//! backend provides. Kept deliberately dumb: one frame encoder, no
//! per-channel routing, since there's a single kernel log stream rather
//! than one per task.

use defmt::global_logger;

#[global_logger]
struct KernelLogger;

static mut ENCODER: defmt::Encoder = defmt::Encoder::new();

defmt::timestamp!("{=u32:us}", 0);

// Safety: defmt::Logger requires exclusive access while acquired. The
// kernel runs on a single hart/core with interrupts disabled around any
// code that logs, so there is never a second caller in flight.
unsafe impl defmt::Logger for KernelLogger {
    fn acquire() {
        unsafe { ENCODER.start_frame(|b| crate::arch::log(b)) };
    }

    unsafe fn flush() {}

    unsafe fn release() {
        ENCODER.end_frame(|b| crate::arch::log(b));
    }

    unsafe fn write(bytes: &[u8]) {
        ENCODER.write(bytes, |b| crate::arch::log(b));
    }
}
