/// Point sizing applied by the host to point-cloud renderables.
pub const POINT_SCALE_FACTOR: f64 = 1.25;
pub const POINT_SCALE_EXPONENT: f64 = 4.0;

/// Label text sizing.
pub const TEXT_SIZE: f64 = 2.75;
pub const TEXT_MIN_SIZE: f64 = 15.0;
pub const TEXT_MAX_SIZE: f64 = 30.0;

/// Interaction sphere radius, in dataset units.
pub const INTERACTION_SPHERE: f64 = 1.0;

/// Camera approach/reach factors used to trigger fade actions.
pub const APPROACH_FACTOR: f64 = 1000.0;
pub const REACH_FACTOR: f64 = 5.0;

/// Branch line defaults.
pub const BRANCH_LINE_WIDTH: f64 = 1.0;
pub const BRANCH_OPACITY: f64 = 0.7;
