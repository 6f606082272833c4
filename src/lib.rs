pub mod app;
pub mod builtin;
pub mod camera;
pub mod camera3d;
pub mod cli;
pub mod config;
pub mod environment;
pub mod error;
pub mod params;
pub mod plugins;
pub mod render_modes;
pub mod scene;
pub mod scheduler;
pub mod session;
pub mod surface;
pub mod time;
pub mod ui;

pub use app::{run, run_with_overrides, App};
pub use error::{HostError, Result};

/// Wraps an angle into `[-PI, PI)`. Non-finite input is returned unchanged.
pub(crate) fn wrap_angle(radians: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    if !radians.is_finite() {
        return radians;
    }
    (radians + PI).rem_euclid(TAU) - PI
}

#[cfg(test)]
mod tests {
    use super::wrap_angle;
    use std::f32::consts::PI;

    #[test]
    fn wrap_angle_stays_in_range_for_huge_inputs() {
        for input in [0.0, 3.5, -3.5, 7.0 * PI, 1e12, -1e12, f32::MAX] {
            let wrapped = wrap_angle(input);
            assert!((-PI..=PI).contains(&wrapped), "{input} wrapped to {wrapped}");
        }
        assert!((wrap_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-5);
        assert!(wrap_angle(f32::INFINITY).is_infinite());
        assert!(wrap_angle(f32::NAN).is_nan());
    }
}
