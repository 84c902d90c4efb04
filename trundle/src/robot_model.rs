// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Physical constants of the Trundle robot.

use core::f32::consts::TAU;

/// Drive wheel radius.
pub const WHEEL_RADIUS_METERS: f32 = 0.032;

/// Encoder ticks per full wheel revolution, gearbox included.
pub const WHEEL_TICKS_PER_REVOLUTION: f32 = 240.0;

/// Wheel rotation per encoder tick.
pub const RADIANS_PER_WHEEL_TICK: f32 = TAU / WHEEL_TICKS_PER_REVOLUTION;
