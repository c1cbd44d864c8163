//! `traffic_client`
//!
//! Client-side systems:
//! - Remote state polling (configuration, periodic step + fetch)
//! - Entity lifecycle reconciliation for cars
//! - Interpolation between poll cycles
//! - Transform compositing for bodies with spinning parts
//! - Static scenery (obstacles, roads, destinations, traffic lights)

pub mod client;
pub mod compositor;
pub mod interp;
pub mod lifecycle;
pub mod poller;
pub mod scene;

pub use client::VisualizationClient;
