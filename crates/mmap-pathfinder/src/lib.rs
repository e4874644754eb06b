//! Path planning on demand-loaded navigation meshes
//!
//! [`PathPlanner`] turns two world positions into a classified list of
//! waypoints, loading the tiles it needs from a shared
//! [`mmap_tilecache::TileCache`].

pub mod config;
pub mod corridor;
pub mod engine;
pub mod error;
pub mod path_finder;
pub mod path_type;
pub mod request;
pub mod smoothing;

#[cfg(test)]
mod path_finder_tests;

pub use config::PlannerConfig;
pub use engine::NavQueryEngine;
pub use error::PlannerError;
pub use path_finder::{plan, PathPlanner};
pub use path_type::PathType;
pub use request::{PathRequest, PathResult, PathSmoothing};
