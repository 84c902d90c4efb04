// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

pub mod ticks;

pub use ticks::{
    left_wheel_tick_count, on_left_encoder_tick, on_right_encoder_tick, reset_wheel_tick_counts,
    right_wheel_tick_count,
};
