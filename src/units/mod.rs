//! Built-in maintenance units
//!
//! Each unit is a single type implementing both halves of the reconcile
//! contract. System access goes through a [`CommandRunner`] so every unit
//! can be configured per platform and exercised without touching the host.

pub mod backend;
pub mod bloatware;
pub mod optimization;
pub mod telemetry;

pub use backend::{CommandRunner, SystemRunner};
pub use bloatware::Bloatware;
pub use optimization::Optimization;
pub use telemetry::Telemetry;

/// Render a number without a trailing `.0` when it is integral
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(10.0), "10");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(0.25), "0.25");
    }
}
