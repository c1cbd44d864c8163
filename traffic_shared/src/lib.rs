//! `traffic_shared`
//!
//! Libraries shared by the visualizer client and its test authority.
//!
//! Design goals:
//! - Deterministic math with one fixed matrix convention.
//! - Clear separation of concerns (net, geometry, math, config, render).
//! - Traits at the external seams (transport, renderer).
//! - No `unsafe`.

pub mod config;
pub mod geometry;
pub mod math;
pub mod net;
pub mod render;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::geometry::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::render::*;
}
