pub mod location_sample;
pub mod progress_entry;
pub mod session;

pub use location_sample::{LocationSample, NewLocationSample};
pub use progress_entry::{ArrivalMethod, CompletionOutcome, ProgressEntry};
pub use session::{Session, SessionStatus, StartOutcome};
