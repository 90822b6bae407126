pub mod controller;
pub mod location;
pub mod maintenance;
pub mod progress;

pub use controller::KrawlModeController;
pub use location::LocationRecorder;
pub use maintenance::{run_maintenance, MaintenanceReport};
pub use progress::{ProgressView, SessionView};
