//! Wheel encoder tick counters shared with the encoder interrupt handlers.
//!
//! The ISRs increment, the control loop reads. Every access happens inside a critical
//! section, so reads can never observe a torn update and the counters work unchanged on the
//! MCU (interrupts masked) and in host-side tests (the `std` critical-section
//! implementation).

use core::cell::Cell;
use critical_section::Mutex;

static LEFT_WHEEL_NUM_TICKS: Mutex<Cell<i32>> = Mutex::new(Cell::new(0));
static RIGHT_WHEEL_NUM_TICKS: Mutex<Cell<i32>> = Mutex::new(Cell::new(0));

/// Left encoder edge handler. Call from the encoder ISR.
pub fn on_left_encoder_tick() {
    critical_section::with(|cs| {
        let ticks = LEFT_WHEEL_NUM_TICKS.borrow(cs);
        ticks.set(ticks.get().wrapping_add(1));
    });
}

/// Right encoder edge handler. Call from the encoder ISR.
pub fn on_right_encoder_tick() {
    critical_section::with(|cs| {
        let ticks = RIGHT_WHEEL_NUM_TICKS.borrow(cs);
        ticks.set(ticks.get().wrapping_add(1));
    });
}

/// Left wheel tick count, read with encoder interrupts masked.
pub fn left_wheel_tick_count() -> i32 {
    critical_section::with(|cs| LEFT_WHEEL_NUM_TICKS.borrow(cs).get())
}

/// Right wheel tick count, read with encoder interrupts masked.
pub fn right_wheel_tick_count() -> i32 {
    critical_section::with(|cs| RIGHT_WHEEL_NUM_TICKS.borrow(cs).get())
}

/// Zeroes both counters. Call once at controller start-up.
pub fn reset_wheel_tick_counts() {
    critical_section::with(|cs| {
        LEFT_WHEEL_NUM_TICKS.borrow(cs).set(0);
        RIGHT_WHEEL_NUM_TICKS.borrow(cs).set(0);
    });
}
