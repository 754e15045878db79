//! Fan-out/fan-in planning of availability queries.

pub mod planner;

pub use planner::AvailabilityPlanner;
