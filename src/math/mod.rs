//! Mathematical utilities for visibility tests

pub mod cone;
pub mod frustum;

pub use cone::{Cone, angle_between};
pub use frustum::{Plane, Frustum};
