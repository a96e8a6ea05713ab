pub mod color_calculator;
pub mod coordinate_switch;
pub mod rendering_components_grid;

pub use rendering_components_grid::run_bevy;
