/// Shared constants for dataset-to-scene compilation.
pub mod coordinate_system;
pub mod palette;
pub mod render_settings;
