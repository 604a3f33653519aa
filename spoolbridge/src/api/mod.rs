//! HTTP API handlers for spoolbridge

pub mod filaments;
pub mod health;
pub mod jobs;

pub use filaments::filament_routes;
pub use health::health_routes;
pub use jobs::job_routes;
