pub mod locks;
pub mod paths;
pub mod retention;
pub mod store;

pub use locks::LockRegistry;
pub use paths::{is_plain_name, Stage, StoreLayout};
pub use retention::{RetentionSweeper, SweepSchedule};
pub use store::{DocumentKey, FaultPolicy, StateStore};
