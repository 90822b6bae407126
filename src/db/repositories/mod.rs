pub mod locations;
pub mod progress;
pub mod sessions;
