// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Generic PID controller for closed-loop control.
//!
//! Works in `no_std` and does not allocate memory.

/// PID controller with a stored target, tunable gains and output clamping.
pub struct Pid {
    /// Proportional gain
    kp: f32,
    /// Integral gain
    ki: f32,
    /// Derivative gain
    kd: f32,

    /// Commanded setpoint
    target: f32,

    /// Integrator state
    integral: f32,
    /// Last process variable (for derivative term)
    prev_measurement: f32,
    /// Last computed correction
    last_output: f32,

    /// Output clamp
    out_min: f32,
    out_max: f32,

    /// Integral anti-windup clamp
    int_min: f32,
    int_max: f32,

    first_update: bool,
}

impl Pid {
    /// Create a new PID controller.
    ///
    /// `kp`, `ki`, `kd` are the gain constants.
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self {
            kp,
            ki,
            kd,

            target: 0.0,

            integral: 0.0,
            prev_measurement: 0.0,
            last_output: 0.0,

            out_min: -1.0,
            out_max: 1.0,

            int_min: -1.0,
            int_max: 1.0,

            first_update: true,
        }
    }

    /// Set output limits.
    pub fn with_output_limits(mut self, min: f32, max: f32) -> Self {
        self.out_min = min;
        self.out_max = max;
        self
    }

    /// Set integral limits for anti-windup.
    pub fn with_integral_limits(mut self, min: f32, max: f32) -> Self {
        self.int_min = min;
        self.int_max = max;
        self
    }

    /// Change the setpoint. The integrator keeps running across setpoint changes.
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
        // self.reset();
    }

    /// Current setpoint.
    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    /// Correction returned by the last [`update`](Self::update) call.
    #[inline]
    pub fn output(&self) -> f32 {
        self.last_output
    }

    /// Reset integrator + derivative history.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_measurement = 0.0;
        self.last_output = 0.0;
        self.first_update = true;
    }

    /// Update the controller.
    ///
    /// `measurement` — current process variable
    /// `dt` — timestep in seconds (e.g. 0.01 for a 100 Hz control loop)
    ///
    /// Returns a correction in [`out_min`, `out_max`] toward the stored target.
    pub fn update(&mut self, measurement: f32, dt: f32) -> f32 {
        let error = self.target - measurement;

        // ----- P term -----
        let p = self.kp * error;

        // ----- I term -----
        self.integral += error * dt * self.ki;

        // Anti-windup clamp
        if self.integral > self.int_max {
            self.integral = self.int_max;
        }
        if self.integral < self.int_min {
            self.integral = self.int_min;
        }

        let i = self.integral;

        // ----- D term (on measurement to reduce noise sensitivity) -----
        let d = if self.first_update {
            self.first_update = false;
            0.0
        } else {
            let dv = self.prev_measurement - measurement;
            self.kd * (dv / dt)
        };
        self.prev_measurement = measurement;

        // ----- Output clamp -----
        let mut out = p + i + d;
        if out > self.out_max {
            out = self.out_max;
        }
        if out < self.out_min {
            out = self.out_min;
        }

        self.last_output = out;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drives_toward_target() {
        let mut pid = Pid::new(1.0, 0.0, 0.0);
        pid.set_target(1.0);
        assert!(pid.update(0.0, 0.01) > 0.0);
        pid.set_target(-1.0);
        assert!(pid.update(0.0, 0.01) < 0.0);
    }

    #[test]
    fn output_is_clamped() {
        let mut pid = Pid::new(100.0, 0.0, 0.0).with_output_limits(-0.5, 0.5);
        pid.set_target(10.0);
        assert_eq!(pid.update(0.0, 0.01), 0.5);
        pid.set_target(-10.0);
        assert_eq!(pid.update(0.0, 0.01), -0.5);
    }

    #[test]
    fn integrator_survives_setpoint_changes() {
        let mut pid = Pid::new(0.0, 10.0, 0.0);
        pid.set_target(1.0);
        for _ in 0..10 {
            pid.update(0.0, 0.01);
        }
        let accumulated = pid.output();
        assert!(accumulated > 0.0);
        pid.set_target(0.0);
        // With zero error the output is exactly the carried integrator state.
        assert_eq!(pid.update(0.0, 0.01), accumulated);
    }

    #[test]
    fn integrator_is_clamped() {
        let mut pid = Pid::new(0.0, 100.0, 0.0).with_integral_limits(-0.25, 0.25);
        pid.set_target(1.0);
        for _ in 0..100 {
            pid.update(0.0, 0.01);
        }
        assert_eq!(pid.output(), 0.25);
    }

    #[test]
    fn derivative_skips_first_update() {
        let mut pid = Pid::new(0.0, 0.0, 1.0);
        pid.set_target(0.0);
        assert_eq!(pid.update(5.0, 0.01), 0.0);
        // Second update sees the measurement fall and damps accordingly.
        assert!(pid.update(4.0, 0.01) > 0.0);
    }

    #[test]
    fn output_accessor_tracks_last_update() {
        let mut pid = Pid::new(1.0, 0.0, 0.0);
        pid.set_target(0.5);
        let out = pid.update(0.0, 0.01);
        assert_eq!(pid.output(), out);
        pid.reset();
        assert_eq!(pid.output(), 0.0);
    }
}
