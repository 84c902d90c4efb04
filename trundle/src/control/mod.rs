// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! # Control Algorithms
//!
//! This module provides reusable building blocks for closed-loop motor control.
//!
//! ## Modules
//!
//! - [`pid`] - General-purpose PID controller implementation.
//! - [`wheel_controller`] - Closed-loop wheel speed controller with plant-inverse feedforward.
//! - [`periodic`] - Fixed-period scheduling for cooperative control loops.

pub mod periodic;
pub mod pid;
pub mod wheel_controller;

pub use periodic::PeriodicTimer;
pub use pid::Pid;
pub use wheel_controller::WheelSpeedController;
