//! Domain services.

mod preload_planner;

pub use preload_planner::PreloadPlanner;
