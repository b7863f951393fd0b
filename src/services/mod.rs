//! External platform integration

pub mod flywheel;
pub mod platform;
pub mod rate_limiter;

pub use flywheel::FlywheelClient;
pub use platform::{ContainerKind, Platform, Project};
