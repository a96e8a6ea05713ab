//! Sensor frame acquisition and buffering.

pub mod controller;
pub mod double_buffer;
pub mod fps;
pub mod frame;

pub use controller::FrameAcquisition;
pub use double_buffer::{DoubleBuffer, FrameWriter};
pub use fps::FpsCounter;
pub use frame::{ColorFrame, DepthFrame, Frame};
