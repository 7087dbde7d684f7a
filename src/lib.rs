//! Thumb - out-of-core page streaming for planet-scale imagery

pub mod core;
pub mod math;
pub mod render;
pub mod streaming;
