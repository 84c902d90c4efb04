// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Closed-loop wheel speed control.
//!
//! Each wheel runs an independent controller: a plant-inverse feedforward maps the commanded
//! speed to a PWM duty cycle, and a PID trims the residual error using the encoder-derived
//! speed estimate. The wheel's rotation direction is not sensed; it is inferred from the
//! commanded target and the last PID output.

// In tests the std inherent float methods take over.
#[cfg(not(test))]
use micromath::F32Ext;

use crate::control::periodic::PeriodicTimer;
use crate::control::pid::Pid;
use crate::robot_model::{RADIANS_PER_WHEEL_TICK, WHEEL_RADIUS_METERS};

const CONTROL_LOOP_PERIOD_SECONDS: f32 = 1e-2;

// Steady-state speed model, fitted experimentally:
//
//   wheel_speed = max(0, SPEED_OFFSET - FACTOR * exp(-(duty_cycle + DUTY_CYCLE_OFFSET) / TIME_CONSTANT))
const SPEED_MODEL_TIME_CONSTANT: f32 = 0.29;
const SPEED_MODEL_DUTY_CYCLE_OFFSET: f32 = -0.99;
const SPEED_MODEL_FACTOR: f32 = 0.041;
const SPEED_MODEL_SPEED_OFFSET: f32 = 0.66;

// Best params at 0.4 m/s
const KP: f32 = 10.0;
const KI: f32 = 5.0;
const KD: f32 = 0.0;

const PWM_DUTY_CYCLE_MIN: f32 = 0.0;
const PWM_DUTY_CYCLE_MAX: f32 = 1.0;

#[inline]
fn seconds_from_nanos(nanos: u64) -> f32 {
    nanos as f32 * 1e-9
}

/// Periodic controller tracking a linear speed target for one wheel.
///
/// Collaborators are injected as closures: `TickCount` reads the wheel's encoder tick count,
/// `DutyCycle` drives the motor PWM in `[-1, 1]`, and `Clock` reads the monotonic time in
/// nanoseconds. Call [`run`](Self::run) from the main loop; the control law executes once per
/// period.
pub struct WheelSpeedController<TickCount, DutyCycle, Clock>
where
    TickCount: FnMut() -> i32,
    DutyCycle: FnMut(f32),
    Clock: FnMut() -> u64,
{
    wheel_tick_count_getter: TickCount,
    duty_cycle_setter: DutyCycle,
    clock: Clock,
    timer: PeriodicTimer,
    pid: Pid,

    time_start_seconds: f32,
    num_wheel_ticks_start: i32,
    average_wheel_speed: f32,
    is_turning_forward: bool,
}

impl<TickCount, DutyCycle, Clock> WheelSpeedController<TickCount, DutyCycle, Clock>
where
    TickCount: FnMut() -> i32,
    DutyCycle: FnMut(f32),
    Clock: FnMut() -> u64,
{
    pub fn new(
        wheel_tick_count_getter: TickCount,
        duty_cycle_setter: DutyCycle,
        clock: Clock,
    ) -> Self {
        Self {
            wheel_tick_count_getter,
            duty_cycle_setter,
            clock,
            timer: PeriodicTimer::new((CONTROL_LOOP_PERIOD_SECONDS * 1e9) as u64),
            pid: Pid::new(KP, KI, KD),
            time_start_seconds: 0.0,
            num_wheel_ticks_start: 0,
            average_wheel_speed: 0.0,
            is_turning_forward: true,
        }
    }

    /// Command a new linear speed target in m/s. Positive is forward.
    pub fn set_linear_speed(&mut self, meters_per_second: f32) {
        self.time_start_seconds = seconds_from_nanos((self.clock)());
        self.num_wheel_ticks_start = (self.wheel_tick_count_getter)();
        self.pid.set_target(meters_per_second);
    }

    /// Command a new angular speed target in rad/s.
    pub fn set_angular_speed(&mut self, radians_per_second: f32) {
        self.set_linear_speed(radians_per_second * WHEEL_RADIUS_METERS);
    }

    /// Computes the open-loop duty cycle for a linear speed by inverting the steady-state
    /// speed model, for both forward and backward speeds, imposing duty cycle limits.
    pub fn duty_cycle_from_linear_speed(&self, meters_per_second: f32) -> f32 {
        if meters_per_second == 0.0 {
            // If speed is 0, force the duty cycle to 0 to save power.
            return 0.0;
        }
        if meters_per_second >= SPEED_MODEL_SPEED_OFFSET {
            return 1.0;
        }
        if meters_per_second <= -SPEED_MODEL_SPEED_OFFSET {
            return -1.0;
        }
        let offset =
            SPEED_MODEL_TIME_CONSTANT * SPEED_MODEL_FACTOR.ln() - SPEED_MODEL_DUTY_CYCLE_OFFSET;
        let mut duty_cycle = offset
            - SPEED_MODEL_TIME_CONSTANT
                * (SPEED_MODEL_SPEED_OFFSET - meters_per_second.abs()).ln();
        duty_cycle = duty_cycle.clamp(PWM_DUTY_CYCLE_MIN, PWM_DUTY_CYCLE_MAX);
        if meters_per_second < 0.0 {
            duty_cycle = -duty_cycle;
        }
        duty_cycle
    }

    /// Fastest commandable forward speed, where the inverse model saturates.
    pub fn max_linear_speed(&self) -> f32 {
        let offset =
            SPEED_MODEL_TIME_CONSTANT * SPEED_MODEL_FACTOR.ln() - SPEED_MODEL_DUTY_CYCLE_OFFSET;
        SPEED_MODEL_SPEED_OFFSET
            - ((offset - PWM_DUTY_CYCLE_MAX) / SPEED_MODEL_TIME_CONSTANT).exp()
    }

    pub fn min_linear_speed(&self) -> f32 {
        -self.max_linear_speed()
    }

    pub fn max_angular_speed(&self) -> f32 {
        self.max_linear_speed() / WHEEL_RADIUS_METERS
    }

    pub fn min_angular_speed(&self) -> f32 {
        -self.max_angular_speed()
    }

    /// Drives the control loop; executes one control update per elapsed period.
    pub fn run(&mut self, now_nanos: u64) {
        if let Some(nanos_since_last_call) = self.timer.tick(now_nanos) {
            self.run_after_period(now_nanos, nanos_since_last_call);
        }
    }

    fn run_after_period(&mut self, now_nanos: u64, nanos_since_last_call: u64) {
        // Estimate wheel turn direction. Assume the wheel is turning in the commanded
        // direction because we cannot sense it. When the target is zero it is no proxy for
        // the speed sign, so infer the sign from the previous pid output instead; otherwise
        // a speed error with a zero target can make the robot drive backwards indefinitely.
        let is_turning_forward =
            self.pid.target() > 0.0 || (self.pid.target() == 0.0 && self.pid.output() >= 0.0);
        if is_turning_forward != self.is_turning_forward {
            // The turn direction changed: the previous estimate's sign is invalid.
            self.average_wheel_speed = 0.0;
        }
        self.is_turning_forward = is_turning_forward;

        // Estimate wheel speed.
        let seconds_since_start = seconds_from_nanos(now_nanos) - self.time_start_seconds;
        let num_encoder_ticks = (self.wheel_tick_count_getter)() - self.num_wheel_ticks_start;
        if num_encoder_ticks > 0 && seconds_since_start > 0.0 {
            // Only update the estimate if any ticks arrived since the last target change.
            // Otherwise we would estimate 0 after every change and cause a control peak.
            let mut current_average_speed = WHEEL_RADIUS_METERS * RADIANS_PER_WHEEL_TICK
                * num_encoder_ticks as f32
                / seconds_since_start;
            if !self.is_turning_forward {
                current_average_speed = -current_average_speed;
            }
            self.average_wheel_speed = current_average_speed;
        }

        // Update the duty cycle with the speed estimate.
        let pid_output = self.pid.update(
            self.average_wheel_speed,
            seconds_from_nanos(nanos_since_last_call),
        );
        let mut speed_command = self.pid.target() + pid_output;
        if (self.is_turning_forward && speed_command < 0.0)
            || (!self.is_turning_forward && speed_command > 0.0)
        {
            // A speed command opposite to the driving direction can make the wheel slip and
            // corrupt odometry beyond what the trajectory controller can recover.
            speed_command = 0.0;
        }
        let duty_cycle = self.duty_cycle_from_linear_speed(speed_command);
        (self.duty_cycle_setter)(duty_cycle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Harness {
        ticks: Rc<Cell<i32>>,
        duty: Rc<Cell<f32>>,
        now_ns: Rc<Cell<u64>>,
    }

    type TestController = WheelSpeedController<
        Box<dyn FnMut() -> i32>,
        Box<dyn FnMut(f32)>,
        Box<dyn FnMut() -> u64>,
    >;

    fn controller() -> (TestController, Harness) {
        let ticks = Rc::new(Cell::new(0));
        let duty = Rc::new(Cell::new(0.0f32));
        let now_ns = Rc::new(Cell::new(0u64));
        let harness = Harness {
            ticks: ticks.clone(),
            duty: duty.clone(),
            now_ns: now_ns.clone(),
        };
        let controller = WheelSpeedController::new(
            Box::new(move || ticks.get()) as Box<dyn FnMut() -> i32>,
            Box::new(move |value| duty.set(value)) as Box<dyn FnMut(f32)>,
            Box::new(move || now_ns.get()) as Box<dyn FnMut() -> u64>,
        );
        (controller, harness)
    }

    const MS_100: u64 = 100_000_000;

    #[test]
    fn zero_speed_is_zero_duty() {
        let (controller, _harness) = controller();
        assert_eq!(controller.duty_cycle_from_linear_speed(0.0), 0.0);
    }

    #[test]
    fn inverse_model_saturates() {
        let (controller, _harness) = controller();
        assert_eq!(controller.duty_cycle_from_linear_speed(0.66), 1.0);
        assert_eq!(controller.duty_cycle_from_linear_speed(2.0), 1.0);
        assert_eq!(controller.duty_cycle_from_linear_speed(-0.66), -1.0);
        assert_eq!(controller.duty_cycle_from_linear_speed(-2.0), -1.0);
    }

    #[test]
    fn inverse_model_is_bounded() {
        let (controller, _harness) = controller();
        let mut speed = -0.8f32;
        while speed < 0.8 {
            assert!(controller.duty_cycle_from_linear_speed(speed).abs() <= 1.0);
            speed += 0.01;
        }
    }

    #[test]
    fn inverse_model_matches_forward_model() {
        let (controller, _harness) = controller();
        for &speed in &[0.1f32, 0.3, 0.4, 0.6] {
            let duty = controller.duty_cycle_from_linear_speed(speed);
            let modeled = (SPEED_MODEL_SPEED_OFFSET
                - SPEED_MODEL_FACTOR
                    * (-(duty + SPEED_MODEL_DUTY_CYCLE_OFFSET) / SPEED_MODEL_TIME_CONSTANT).exp())
            .max(0.0);
            assert!((modeled - speed).abs() < 1e-2, "speed {speed} duty {duty}");
        }
    }

    #[test]
    fn speed_limits_are_symmetric() {
        let (controller, _harness) = controller();
        let max = controller.max_linear_speed();
        assert!(max > 0.0 && max < SPEED_MODEL_SPEED_OFFSET);
        assert_eq!(controller.min_linear_speed(), -max);
        assert_eq!(
            controller.max_angular_speed(),
            max / WHEEL_RADIUS_METERS
        );
        assert_eq!(controller.min_angular_speed(), -max / WHEEL_RADIUS_METERS);
    }

    #[test]
    fn tracks_forward_target() {
        let (mut controller, harness) = controller();
        controller.run(0); // arm the period timer
        controller.set_linear_speed(0.4);

        // 50 ticks in 100 ms reads just above target; the PID trims but the duty cycle
        // stays inside [0, 1].
        harness.ticks.set(50);
        harness.now_ns.set(MS_100);
        controller.run(MS_100);
        let duty = harness.duty.get();
        assert!(duty > 0.0 && duty < 1.0, "duty {duty}");
    }

    #[test]
    fn zero_target_after_forward_keeps_forward_direction() {
        let (mut controller, harness) = controller();
        controller.run(0);
        controller.set_linear_speed(0.4);
        // 45 ticks read below target, so the last PID output is positive.
        harness.ticks.set(45);
        harness.now_ns.set(MS_100);
        controller.run(MS_100);

        // Dropping the target to zero with a non-negative last PID output keeps the
        // forward direction estimate: a backward command would be zeroed, so the duty
        // cycle can never go negative here.
        controller.set_linear_speed(0.0);
        harness.now_ns.set(2 * MS_100);
        controller.run(2 * MS_100);
        assert!(harness.duty.get() >= 0.0);
    }

    #[test]
    fn reverse_target_flips_direction_and_duty_sign() {
        let (mut controller, harness) = controller();
        controller.run(0);
        controller.set_linear_speed(0.4);
        harness.ticks.set(50);
        harness.now_ns.set(MS_100);
        controller.run(MS_100);
        assert!(harness.duty.get() > 0.0);

        controller.set_linear_speed(-0.2);
        harness.now_ns.set(2 * MS_100);
        controller.run(2 * MS_100);
        assert!(harness.duty.get() < 0.0);
    }

    #[test]
    fn no_ticks_keeps_previous_estimate() {
        let (mut controller, harness) = controller();
        controller.run(0);
        controller.set_linear_speed(0.4);
        harness.ticks.set(50);
        harness.now_ns.set(MS_100);
        controller.run(MS_100);
        let duty_with_estimate = harness.duty.get();

        // Changing the setpoint resets the tick window; with no new ticks the previous
        // speed estimate must be retained rather than read as zero.
        controller.set_linear_speed(0.41);
        harness.now_ns.set(2 * MS_100);
        controller.run(2 * MS_100);
        let duty = harness.duty.get();
        assert!((duty - duty_with_estimate).abs() < 0.5);
        assert!(duty > 0.0);
    }
}
